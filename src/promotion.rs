//! Rank promotion decisions. One step per member per run.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::ranks::{PromotionRule, Rank, RankLadder};

/// Date layouts accepted in the roster's enrollment column, tried in order.
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S"];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// One roster row as read at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterMember {
    /// 1-based sheet row, used to address write-backs.
    pub row: u32,
    pub name: String,
    pub external_id: Option<u64>,
    /// `None` when the roster holds a rank name outside the hierarchy.
    pub rank: Option<Rank>,
    pub progress_counter: u32,
    pub enrolled_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionDecision {
    pub member_name: String,
    pub from_rank: Rank,
    pub to_rank: Rank,
    pub external_id: Option<u64>,
}

/// Case-folded form used whenever member names are compared.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Parses an enrollment date; the first matching layout wins.
pub fn parse_enrollment_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        })
}

pub struct PromotionEngine {
    ladder: RankLadder,
}

impl PromotionEngine {
    pub fn new(ladder: RankLadder) -> Self {
        Self { ladder }
    }

    /// Decisions for active, promotable members, in roster order.
    pub fn decide(
        &self,
        active_members: &HashSet<String>,
        roster: &[RosterMember],
        now: DateTime<Utc>,
    ) -> Vec<PromotionDecision> {
        let active: HashSet<String> = active_members.iter().map(|n| name_key(n)).collect();

        let eligible: Vec<(&RosterMember, Rank)> = roster
            .iter()
            .filter(|m| active.contains(&name_key(&m.name)))
            .filter_map(|m| m.rank.filter(|r| !r.is_terminal()).map(|r| (m, r)))
            .collect();
        info!("Processing {} members for potential promotion", eligible.len());

        eligible
            .into_iter()
            .filter_map(|(member, current)| self.check_member(member, current, now))
            .collect()
    }

    fn check_member(
        &self,
        member: &RosterMember,
        current: Rank,
        now: DateTime<Utc>,
    ) -> Option<PromotionDecision> {
        let next = current.next()?;

        let promote = match self.ladder.rule_for(current)? {
            PromotionRule::DaysEnrolled(required_days) => {
                let Some(enrolled) = member.enrolled_at.as_deref().and_then(parse_enrollment_date)
                else {
                    warn!(
                        "Could not parse added date for {}: {:?}",
                        member.name, member.enrolled_at
                    );
                    return None;
                };
                let days = (now.naive_utc() - enrolled).num_days();
                let promote = days >= required_days;
                if promote {
                    info!("{}: Time-based promotion {} -> {} ({} days)", member.name, current, next, days);
                }
                promote
            }
            PromotionRule::Counter(threshold) => {
                let promote = member.progress_counter >= threshold;
                if promote {
                    info!(
                        "{}: Counter-based promotion {} -> {} ({} >= {})",
                        member.name, current, next, member.progress_counter, threshold
                    );
                }
                promote
            }
        };

        promote.then(|| PromotionDecision {
            member_name: member.name.clone(),
            from_rank: current,
            to_rank: next,
            external_id: member.external_id,
        })
    }
}
