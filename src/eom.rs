//! The end-of-month pass: aggregate, decide, execute, report.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tracing::{error, info};

use crate::aggregator::{
    active_members, month_from_name, month_title, Aggregator, FeedChannel, MessageHistory,
    MonthlyAchievements,
};
use crate::config::{Config, RoleConfig};
use crate::error::CommandError;
use crate::executor::{ExecutionReport, PromotionExecutor, RoleDirectory};
use crate::promotion::{PromotionDecision, PromotionEngine};
use crate::ranks::RankLadder;
use crate::report::{achievement_summary, promotion_summary};
use crate::roster::RosterStore;
use crate::valuation::LootValuer;
use crate::wiseoldman::{
    format_gains_summary, monthly_gains_summary, StatTracker, TOP_GAINS_LIMIT,
};

/// Collaborators the pass talks to.
#[derive(Clone)]
pub struct EomServices {
    pub history: Arc<dyn MessageHistory>,
    pub roster: Arc<dyn RosterStore>,
    pub roles: Arc<dyn RoleDirectory>,
    pub stats: Arc<dyn StatTracker>,
    pub valuer: Arc<LootValuer>,
}

pub struct EomOutcome {
    pub month: String,
    pub year: i32,
    pub achievements: MonthlyAchievements,
    pub decisions: Vec<PromotionDecision>,
    pub execution: ExecutionReport,
    /// Set when the roster snapshot could not be read; no promotions were attempted.
    pub roster_read_error: Option<String>,
    pub gains_summary: String,
}

impl EomOutcome {
    pub fn promoted(&self) -> Vec<PromotionDecision> {
        self.execution.successful().into_iter().cloned().collect()
    }

    /// Combined reply for the invoking user.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("✅ **{} EOM Processing Complete**", self.month),
            achievement_summary(&self.achievements),
        ];
        if !self.gains_summary.trim().is_empty() {
            parts.push(self.gains_summary.clone());
        }
        parts.push(promotion_summary(&self.promoted()));
        if let Some(why) = &self.roster_read_error {
            parts.push(format!("⚠️ Roster could not be read, promotions were skipped: {why}"));
        }
        if let Some(why) = &self.execution.roster_error {
            parts.push(format!("⚠️ Roster was not updated: {why}"));
        }
        if self.execution.role_failures() > 0 {
            parts.push(format!(
                "⚠️ Discord roles could not be updated for {} member(s). Check the logs.",
                self.execution.role_failures()
            ));
        }
        parts.join("\n\n")
    }
}

pub struct EomRunner {
    services: EomServices,
    engine: PromotionEngine,
    feeds: Vec<FeedChannel>,
    role_ids: RoleConfig,
}

impl EomRunner {
    pub fn new(
        services: EomServices,
        ladder: RankLadder,
        feeds: Vec<FeedChannel>,
        role_ids: RoleConfig,
    ) -> Self {
        Self {
            services,
            engine: PromotionEngine::new(ladder),
            feeds,
            role_ids,
        }
    }

    pub fn from_config(services: EomServices, config: &Config) -> Self {
        Self::new(
            services,
            config.ladder.clone(),
            config.channels.feed_channels(),
            config.roles.clone(),
        )
    }

    /// Runs a full pass. `Ok(None)` means the month had nothing to report.
    /// Collaborator failures after aggregation are reported in the outcome.
    pub async fn run(
        &self,
        month: &str,
        year: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<Option<EomOutcome>, CommandError> {
        let month_num = month_from_name(month)?;
        let year = year.unwrap_or_else(|| now.year());

        let aggregator = Aggregator::new(
            Arc::clone(&self.services.history),
            Arc::clone(&self.services.valuer),
            self.feeds.clone(),
        );
        let achievements = aggregator.aggregate(month, Some(year)).await?;
        if achievements.is_empty() {
            info!("No achievements found for {} {}", month_title(month_num), year);
            return Ok(None);
        }
        info!(
            month = month_title(month_num),
            members = achievements.len(),
            achievements = achievements.values().map(|m| m.achievements.len()).sum::<usize>(),
            "Achievement parsing complete"
        );

        let (decisions, execution, roster_read_error) =
            match self.services.roster.read_members().await {
                Ok(roster) => {
                    let decisions =
                        self.engine.decide(&active_members(&achievements), &roster, now);
                    for d in &decisions {
                        info!(member = %d.member_name, from = %d.from_rank, to = %d.to_rank, "Promotion decided");
                    }
                    let execution = PromotionExecutor::new(
                        self.services.roster.as_ref(),
                        self.services.roles.as_ref(),
                        &self.role_ids,
                    )
                    .execute(&decisions, &roster)
                    .await;
                    (decisions, execution, None)
                }
                Err(why) => {
                    error!("Could not read roster, skipping promotions: {}", why);
                    (Vec::new(), ExecutionReport::default(), Some(why.to_string()))
                }
            };

        let (ehp, ehb) = monthly_gains_summary(self.services.stats.as_ref(), TOP_GAINS_LIMIT).await;

        Ok(Some(EomOutcome {
            month: month_title(month_num).to_string(),
            year,
            achievements,
            decisions,
            execution,
            roster_read_error,
            gains_summary: format_gains_summary(&ehp, &ehb),
        }))
    }
}
