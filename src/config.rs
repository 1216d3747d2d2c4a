use std::str::FromStr;

use crate::aggregator::FeedChannel;
use crate::classifier::ChannelKind;
use crate::error::ConfigError;
use crate::ranks::{Rank, RankLadder};
use crate::roster::RosterColumns;

const DEFAULT_MANAGER_ROLES: &str = "Admin,Moderator,EOM Manager";

/// Feed and announcement channels. Zero means "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    pub eom_post: u64,
    pub wise_old_man: u64,
    pub loot_notifications: u64,
    pub log_notifications: u64,
    pub rank_change: u64,
    pub update: u64,
    pub applications_accepted: u64,
    pub mod_review: u64,
}

impl ChannelConfig {
    /// Channels scanned for monthly achievements, in scan order.
    pub fn feed_channels(&self) -> Vec<FeedChannel> {
        vec![
            FeedChannel {
                id: self.wise_old_man,
                kind: ChannelKind::Achievements,
            },
            FeedChannel {
                id: self.loot_notifications,
                kind: ChannelKind::LootNotifications,
            },
            FeedChannel {
                id: self.log_notifications,
                kind: ChannelKind::LogNotifications,
            },
        ]
    }
}

/// Discord role ids, one per rank. Zero means "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleConfig {
    pub mediator: u64,
    pub sage: u64,
    pub destroyer: u64,
    pub unholy: u64,
    pub legend: u64,
}

impl RoleConfig {
    pub fn role_for(&self, rank: Rank) -> Option<u64> {
        let id = match rank {
            Rank::Mediator => self.mediator,
            Rank::Sage => self.sage,
            Rank::Destroyer => self.destroyer,
            Rank::Unholy => self.unholy,
            Rank::Legend => self.legend,
        };
        (id != 0).then_some(id)
    }
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub tab: String,
    pub service_account_json: String,
    pub columns: RosterColumns,
}

#[derive(Debug, Clone)]
pub struct WiseOldManConfig {
    pub group_id: u64,
    pub api_key: Option<String>,
    pub verification_code: Option<String>,
}

/// Roles touched when moderators decide on an application. Zero means "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationRoles {
    pub pending: u64,
    pub unholy: u64,
    pub friend: u64,
    pub denied: u64,
}

/// Wall-clock time of the daily stat sync, in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: 0,
            minute: 0,
            utc_offset_hours: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub guild_id: u64,
    pub channels: ChannelConfig,
    pub roles: RoleConfig,
    pub applications: ApplicationRoles,
    pub ladder: RankLadder,
    pub sheets: SheetsConfig,
    pub wise_old_man: WiseOldManConfig,
    pub schedule: ScheduleConfig,
    pub manager_roles: Vec<String>,
    pub item_catalog_json: Option<String>,
}

/// Reads names through a lookup, remembering every required name that was absent.
struct Reader<F> {
    lookup: F,
    missing: Vec<String>,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, name: &str) -> String {
        match self.get(name) {
            Some(value) => value,
            None => {
                self.missing.push(name.to_string());
                String::new()
            }
        }
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn required_id(&mut self, name: &str) -> Result<u64, ConfigError> {
        let raw = self.required(name);
        if raw.is_empty() {
            return Ok(0);
        }
        parse_id(name, &raw)
    }

    fn id(&self, name: &str) -> Result<u64, ConfigError> {
        self.parsed(name, 0u64)
    }
}

fn parse_id(name: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name: name.to_string(),
            reason: "must be non-zero".to_string(),
        }),
        Ok(id) => Ok(id),
        Err(e) => Err(ConfigError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn parse_time_of_day(raw: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::Invalid {
        name: "DAILY_UPDATE_TIME".to_string(),
        reason: format!("expected HH:MM, got '{raw}'"),
    };
    let (h, m) = raw.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

impl Config {
    /// Builds the configuration from a key lookup (secrets, then environment).
    /// Every missing required name is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut r = Reader {
            lookup,
            missing: Vec::new(),
        };

        let discord_token = r.required("DISCORD_TOKEN");
        let guild_id = r.required_id("GUILD_ID")?;
        let spreadsheet_id = r.required("GOOGLE_SHEETS_ID");
        let service_account_json = r.required("GOOGLE_SERVICE_ACCOUNT_JSON");
        let group_id = r.required_id("WISE_OLD_MAN_GROUP_ID")?;

        if !r.missing.is_empty() {
            return Err(ConfigError::Missing(r.missing));
        }

        let channels = ChannelConfig {
            eom_post: r.id("EOM_POST_CHANNEL_ID")?,
            wise_old_man: r.id("WISE_OLD_MAN_CHANNEL_ID")?,
            loot_notifications: r.id("LOOT_NOTIFICATIONS_CHANNEL_ID")?,
            log_notifications: r.id("LOG_NOTIFICATIONS_CHANNEL_ID")?,
            rank_change: r.id("RANK_CHANGE_CHANNEL_ID")?,
            update: r.id("UPDATE_CHANNEL_ID")?,
            applications_accepted: r.id("APPLICATIONS_ACCEPTED_CHANNEL_ID")?,
            mod_review: r.id("MOD_REVIEW_CHANNEL_ID")?,
        };

        let roles = RoleConfig {
            mediator: r.id("MEDIATOR_ROLE_ID")?,
            sage: r.id("SAGE_ROLE_ID")?,
            destroyer: r.id("DESTROYER_ROLE_ID")?,
            unholy: r.id("UNHOLY_ROLE_ID")?,
            legend: r.id("LEGEND_ROLE_ID")?,
        };

        let applications = ApplicationRoles {
            pending: r.id("APPLICATION_PENDING_ROLE_ID")?,
            unholy: roles.unholy,
            friend: r.id("FRIEND_ROLE_ID")?,
            denied: r.id("APPLICATION_DENY_ROLE_ID")?,
        };

        let defaults = RankLadder::default();
        let ladder = RankLadder {
            sage_threshold: r.parsed("SAGE_PROMOTION_THRESHOLD", defaults.sage_threshold)?,
            destroyer_threshold: r
                .parsed("DESTROYER_PROMOTION_THRESHOLD", defaults.destroyer_threshold)?,
            unholy_threshold: r.parsed("UNHOLY_PROMOTION_THRESHOLD", defaults.unholy_threshold)?,
            mediator_days: r.parsed("MEDIATOR_TIME_REQUIREMENT_DAYS", defaults.mediator_days)?,
        };

        let default_columns = RosterColumns::default();
        let columns = RosterColumns {
            name: r.get("MEMBER_NAME_COLUMN").unwrap_or(default_columns.name),
            external_id: r.get("DISCORD_ID_COLUMN").unwrap_or(default_columns.external_id),
            rank: r.get("RANK_COLUMN").unwrap_or(default_columns.rank),
            counter: r
                .get("CAREER_COUNTER_COLUMN")
                .unwrap_or(default_columns.counter),
            enrolled: r.get("ADDED_DATE_COLUMN").unwrap_or(default_columns.enrolled),
        };
        columns.validate()?;

        let mut schedule = ScheduleConfig::default();
        if let Some(raw) = r.get("DAILY_UPDATE_TIME") {
            let (hour, minute) = parse_time_of_day(&raw)?;
            schedule.hour = hour;
            schedule.minute = minute;
        }
        schedule.utc_offset_hours = r.parsed("SCHEDULE_UTC_OFFSET", schedule.utc_offset_hours)?;
        if !(-23..=23).contains(&schedule.utc_offset_hours) {
            return Err(ConfigError::Invalid {
                name: "SCHEDULE_UTC_OFFSET".to_string(),
                reason: "offset must be within ±23 hours".to_string(),
            });
        }

        let manager_roles = r
            .get("EOM_MANAGER_ROLES")
            .unwrap_or_else(|| DEFAULT_MANAGER_ROLES.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            discord_token,
            guild_id,
            channels,
            roles,
            applications,
            ladder,
            sheets: SheetsConfig {
                spreadsheet_id,
                tab: r.get("GOOGLE_SHEETS_TAB").unwrap_or_else(|| "Sheet1".to_string()),
                service_account_json,
                columns,
            },
            wise_old_man: WiseOldManConfig {
                group_id,
                api_key: r.get("WOM_API_KEY"),
                verification_code: r.get("WOM_VERIFICATION_CODE"),
            },
            schedule,
            manager_roles,
            item_catalog_json: r.get("ITEM_CATALOG_JSON"),
        })
    }
}
