//! Builds per-member monthly summaries from the feed channels.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use tracing::{error, info, warn};

use crate::classifier::{classify, ChannelKind, LootLine, MessageKind};
use crate::error::{CollaboratorError, ValidationError};
use crate::valuation::LootValuer;

const MONTHS: [(&str, u32); 12] = [
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

/// Full name or three-letter abbreviation, any case.
pub fn month_from_name(name: &str) -> Result<u32, ValidationError> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(ValidationError::EmptyMonth);
    }
    MONTHS
        .iter()
        .find(|(full, _)| *full == name || (name.len() == 3 && full.starts_with(name.as_str())))
        .map(|(_, n)| *n)
        .ok_or(ValidationError::InvalidMonth(name))
}

/// Canonical capitalized month name, e.g. for report headers.
pub fn month_title(month: u32) -> &'static str {
    const TITLES: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    TITLES[(month.clamp(1, 12) - 1) as usize]
}

/// Inclusive window covering one calendar month (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthWindow {
    pub fn new(year: i32, month: u32) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidMonth(format!("{month}/{year}"));
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .ok_or_else(invalid)?;
        let start = first.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
        let end = last.and_hms_milli_opt(23, 59, 59, 999).ok_or_else(invalid)?;
        Ok(Self {
            start: Utc.from_utc_datetime(&start),
            end: Utc.from_utc_datetime(&end),
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// One message as seen in a feed channel's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub content: String,
    pub author_is_bot: bool,
    pub timestamp: DateTime<Utc>,
}

/// A configured feed channel. An id of zero means the channel is not set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedChannel {
    pub id: u64,
    pub kind: ChannelKind,
}

/// Message history retrieval bounded by a time window.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    async fn messages_in(
        &self,
        channel_id: u64,
        window: &MonthWindow,
    ) -> Result<Vec<FeedMessage>, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementRecord {
    pub member_name: String,
    pub text: String,
    pub source: ChannelKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyMemberSummary {
    pub member_name: String,
    pub achievements: Vec<AchievementRecord>,
    /// Repeat drops are legitimate, so these are never deduplicated.
    pub loot_lines: Vec<LootLine>,
    pub total_loot_value: u64,
}

impl MonthlyMemberSummary {
    fn new(member_name: &str) -> Self {
        Self {
            member_name: member_name.to_string(),
            achievements: Vec::new(),
            loot_lines: Vec::new(),
            total_loot_value: 0,
        }
    }

    fn dedup_achievements(&mut self) {
        let mut seen = HashSet::new();
        self.achievements.retain(|a| seen.insert(a.text.clone()));
    }
}

pub type MonthlyAchievements = BTreeMap<String, MonthlyMemberSummary>;

pub struct Aggregator {
    history: Arc<dyn MessageHistory>,
    valuer: Arc<LootValuer>,
    channels: Vec<FeedChannel>,
}

impl Aggregator {
    pub fn new(
        history: Arc<dyn MessageHistory>,
        valuer: Arc<LootValuer>,
        channels: Vec<FeedChannel>,
    ) -> Self {
        Self {
            history,
            valuer,
            channels,
        }
    }

    /// Collects a month of achievements. Unreadable channels are skipped; an
    /// empty result means "nothing to report".
    pub async fn aggregate(
        &self,
        month: &str,
        year: Option<i32>,
    ) -> Result<MonthlyAchievements, ValidationError> {
        let month_num = month_from_name(month)?;
        let year = year.unwrap_or_else(|| Utc::now().year());
        let window = MonthWindow::new(year, month_num)?;

        let mut summaries = MonthlyAchievements::new();

        for channel in self.channels.iter().filter(|c| c.id != 0) {
            let messages = match self.history.messages_in(channel.id, &window).await {
                Ok(messages) => messages,
                Err(why) if why.is_forbidden() => {
                    error!("No permission to read messages in channel {}: {}", channel.id, why);
                    continue;
                }
                Err(why) => {
                    error!("Failed to parse channel {}: {}", channel.id, why);
                    continue;
                }
            };

            let fetched = messages.len();
            let classified = self
                .fold_channel(channel.kind, &window, messages, &mut summaries)
                .await;
            summaries
                .values_mut()
                .for_each(MonthlyMemberSummary::dedup_achievements);

            if classified == 0 && fetched > 0 {
                warn!("No classifiable messages in {} channel {}", channel.kind.label(), channel.id);
            }
            info!(
                channel = channel.id,
                kind = channel.kind.label(),
                fetched,
                classified,
                "Parsed feed channel"
            );
        }

        info!(
            "Total achievements parsed for {} {}: {} members",
            month_title(month_num),
            year,
            summaries.len()
        );
        Ok(summaries)
    }

    async fn fold_channel(
        &self,
        kind: ChannelKind,
        window: &MonthWindow,
        messages: Vec<FeedMessage>,
        summaries: &mut MonthlyAchievements,
    ) -> usize {
        let mut classified_count = 0;
        for message in messages {
            if message.author_is_bot
                || message.content.trim().is_empty()
                || !window.contains(message.timestamp)
            {
                continue;
            }

            let Some(classified) = classify(&message.content, kind) else {
                continue;
            };
            classified_count += 1;

            let loot_value = if classified.kind == MessageKind::Notification
                && !classified.loot.is_empty()
            {
                self.valuer.valuate(&classified.loot).await.total
            } else {
                0
            };

            let summary = summaries
                .entry(classified.member_name.clone())
                .or_insert_with(|| MonthlyMemberSummary::new(&classified.member_name));
            summary.achievements.push(AchievementRecord {
                member_name: classified.member_name,
                text: classified.text,
                source: kind,
            });
            summary.loot_lines.extend(classified.loot);
            summary.total_loot_value = summary.total_loot_value.saturating_add(loot_value);
        }
        classified_count
    }
}

/// Names of every member with at least one achievement this month.
pub fn active_members(achievements: &MonthlyAchievements) -> HashSet<String> {
    achievements.keys().cloned().collect()
}
