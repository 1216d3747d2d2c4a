//! Serenity-backed collaborators: channel history, guild roles and sends.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId};
use tracing::{debug, error};

use crate::aggregator::{FeedMessage, MessageHistory, MonthWindow};
use crate::error::CollaboratorError;
use crate::executor::RoleDirectory;

/// Milliseconds between the Unix epoch and the first Discord snowflake.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
const HISTORY_PAGE_SIZE: u64 = 100;

/// Smallest snowflake that could have been minted at `at`.
pub fn snowflake_at(at: DateTime<Utc>) -> u64 {
    let ms = (at.timestamp_millis() - DISCORD_EPOCH_MS).max(0) as u64;
    ms << 22
}

/// Creation time encoded in a snowflake.
pub fn snowflake_time(id: u64) -> DateTime<Utc> {
    let ms = (id >> 22) as i64 + DISCORD_EPOCH_MS;
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn not_found(why: &serenity::Error) -> bool {
    match why {
        serenity::Error::Http(http) => http.status_code().map(|s| s.as_u16()) == Some(404),
        _ => false,
    }
}

/// Pages forward through a channel from the window start until it is passed.
pub struct DiscordHistory {
    http: Arc<Http>,
}

impl DiscordHistory {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageHistory for DiscordHistory {
    async fn messages_in(
        &self,
        channel_id: u64,
        window: &MonthWindow,
    ) -> Result<Vec<FeedMessage>, CollaboratorError> {
        let channel = ChannelId(channel_id);
        let mut after = MessageId(snowflake_at(window.start).saturating_sub(1));
        let mut collected = Vec::new();

        loop {
            let page = channel
                .messages(&self.http, |b| b.after(after).limit(HISTORY_PAGE_SIZE))
                .await?;
            let Some(newest) = page.iter().map(|m| m.id).max() else {
                break;
            };
            let page_len = page.len() as u64;

            collected.extend(
                page.into_iter()
                    .map(|m| FeedMessage {
                        timestamp: snowflake_time(m.id.0),
                        author_is_bot: m.author.bot,
                        content: m.content,
                    })
                    .filter(|m| window.contains(m.timestamp)),
            );

            if page_len < HISTORY_PAGE_SIZE || snowflake_time(newest.0) > window.end {
                break;
            }
            after = newest;
        }

        collected.sort_by_key(|m| m.timestamp);
        debug!("Fetched {} messages from channel {}", collected.len(), channel_id);
        Ok(collected)
    }
}

/// Role membership for one guild.
pub struct DiscordRoles {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordRoles {
    pub fn new(http: Arc<Http>, guild_id: u64) -> Self {
        Self {
            http,
            guild_id: GuildId(guild_id),
        }
    }

    async fn member(&self, user_id: u64) -> Result<serenity::model::guild::Member, CollaboratorError> {
        Ok(self.http.get_member(self.guild_id.0, user_id).await?)
    }
}

#[async_trait]
impl RoleDirectory for DiscordRoles {
    async fn member_roles(&self, user_id: u64) -> Result<Option<Vec<u64>>, CollaboratorError> {
        match self.http.get_member(self.guild_id.0, user_id).await {
            Ok(member) => Ok(Some(member.roles.iter().map(|r| r.0).collect())),
            Err(why) if not_found(&why) => Ok(None),
            Err(why) => Err(why.into()),
        }
    }

    async fn add_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError> {
        let mut member = self.member(user_id).await?;
        member.add_role(&self.http, RoleId(role_id)).await?;
        Ok(())
    }

    async fn remove_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError> {
        let mut member = self.member(user_id).await?;
        member.remove_role(&self.http, RoleId(role_id)).await?;
        Ok(())
    }
}

/// Posts each chunk in order, stopping at the first failure.
pub async fn send_chunks(
    http: &Http,
    channel_id: u64,
    chunks: &[String],
) -> Result<(), CollaboratorError> {
    for chunk in chunks {
        if let Err(why) = ChannelId(channel_id).say(http, chunk).await {
            error!("Failed to send message to channel {}: {}", channel_id, why);
            return Err(why.into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_round_trip_to_the_millisecond() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(snowflake_time(snowflake_at(at)), at);
    }

    #[test]
    fn known_message_id_decodes() {
        // 175928847299117063 is the example id from Discord's reference docs
        let at = snowflake_time(175_928_847_299_117_063);
        assert_eq!(at.timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn pre_epoch_times_clamp_to_zero() {
        let at = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(snowflake_at(at), 0);
    }
}
