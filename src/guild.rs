//! Guild setup and bot permission checks run before an EOM pass.

use serenity::client::Context;
use serenity::model::channel::Channel;
use serenity::model::guild::{Guild, Member};
use serenity::model::id::{ChannelId, GuildId, RoleId};
use serenity::model::permissions::Permissions;

use tracing::warn;

use crate::config::{ChannelConfig, RoleConfig};
use crate::error::SetupError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAccess {
    pub name: String,
    pub read_history: bool,
    pub send_messages: bool,
}

/// Read-only view of a guild from the bot's point of view.
pub trait GuildLookup {
    fn channel(&self, id: u64) -> Option<ChannelAccess>;

    fn has_role(&self, id: u64) -> bool;

    fn can_manage_roles(&self) -> bool;
}

fn required_channels(channels: &ChannelConfig) -> [(&'static str, u64); 5] {
    [
        ("EOM Post", channels.eom_post),
        ("Wise Old Man", channels.wise_old_man),
        ("Loot Notifications", channels.loot_notifications),
        ("Log Notifications", channels.log_notifications),
        ("Rank Change", channels.rank_change),
    ]
}

fn required_roles(roles: &RoleConfig) -> [(&'static str, u64); 5] {
    [
        ("Mediator", roles.mediator),
        ("Sage", roles.sage),
        ("Destroyer", roles.destroyer),
        ("Unholy", roles.unholy),
        ("Legend", roles.legend),
    ]
}

/// Every channel and role that is unset or missing from the guild.
pub fn setup_problems(
    guild: &dyn GuildLookup,
    channels: &ChannelConfig,
    roles: &RoleConfig,
) -> Vec<String> {
    let mut problems = Vec::new();
    for (name, id) in required_channels(channels) {
        if id == 0 {
            problems.push(format!("{name} channel ID not configured"));
        } else if guild.channel(id).is_none() {
            problems.push(format!("{name} channel not found (ID: {id})"));
        }
    }
    for (name, id) in required_roles(roles) {
        if id == 0 {
            problems.push(format!("{name} role ID not configured"));
        } else if !guild.has_role(id) {
            problems.push(format!("{name} role not found (ID: {id})"));
        }
    }
    problems
}

/// Permissions the bot lacks for reading feeds, announcing and editing roles.
pub fn permission_problems(guild: &dyn GuildLookup, channels: &ChannelConfig) -> Vec<String> {
    let mut problems = Vec::new();
    if !guild.can_manage_roles() {
        problems.push("Missing permission: manage_roles".to_string());
    }
    for (_, id) in required_channels(channels) {
        let Some(access) = (id != 0).then(|| guild.channel(id)).flatten() else {
            continue;
        };
        if !access.read_history {
            problems.push(format!("Cannot read message history in #{}", access.name));
        }
        if id == channels.rank_change && !access.send_messages {
            problems.push(format!("Cannot send messages in #{}", access.name));
        }
    }
    problems
}

pub fn validate_guild(
    guild: &dyn GuildLookup,
    channels: &ChannelConfig,
    roles: &RoleConfig,
) -> Result<(), SetupError> {
    let mut problems = setup_problems(guild, channels, roles);
    problems.extend(permission_problems(guild, channels));
    if problems.is_empty() {
        Ok(())
    } else {
        Err(SetupError { problems })
    }
}

/// Guild-wide permissions that let the bot edit member roles.
pub fn grants_manage_roles(permissions: Permissions) -> bool {
    permissions.administrator() || permissions.manage_roles()
}

/// Snapshot of the cached guild plus the bot's own member record.
pub struct CachedGuild {
    guild: Guild,
    bot: Option<Member>,
    guild_permissions: Permissions,
}

impl CachedGuild {
    pub async fn load(ctx: &Context, guild_id: GuildId) -> Option<Self> {
        let guild = ctx.cache.guild(guild_id)?;
        let bot_id = ctx.cache.current_user_id();
        let bot = match guild.members.get(&bot_id) {
            Some(member) => Some(member.clone()),
            None => guild_id.member(ctx, bot_id).await.ok(),
        };
        let guild_permissions = match guild.member_permissions(ctx, bot_id).await {
            Ok(permissions) => permissions,
            Err(why) => {
                warn!("Could not resolve bot permissions in guild {}: {}", guild_id, why);
                Permissions::empty()
            }
        };
        Some(Self {
            guild,
            bot,
            guild_permissions,
        })
    }

    fn permissions_in(&self, channel: &serenity::model::channel::GuildChannel) -> Permissions {
        self.bot
            .as_ref()
            .and_then(|member| self.guild.user_permissions_in(channel, member).ok())
            .unwrap_or_else(Permissions::empty)
    }
}

impl GuildLookup for CachedGuild {
    fn channel(&self, id: u64) -> Option<ChannelAccess> {
        match self.guild.channels.get(&ChannelId(id))? {
            Channel::Guild(channel) => {
                let perms = self.permissions_in(channel);
                Some(ChannelAccess {
                    name: channel.name.clone(),
                    read_history: perms.read_message_history(),
                    send_messages: perms.send_messages(),
                })
            }
            _ => None,
        }
    }

    fn has_role(&self, id: u64) -> bool {
        self.guild.roles.contains_key(&RoleId(id))
    }

    fn can_manage_roles(&self) -> bool {
        grants_manage_roles(self.guild_permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeGuild {
        channels: HashMap<u64, ChannelAccess>,
        roles: Vec<u64>,
        manage_roles: bool,
    }

    impl GuildLookup for FakeGuild {
        fn channel(&self, id: u64) -> Option<ChannelAccess> {
            self.channels.get(&id).cloned()
        }

        fn has_role(&self, id: u64) -> bool {
            self.roles.contains(&id)
        }

        fn can_manage_roles(&self) -> bool {
            self.manage_roles
        }
    }

    fn open(name: &str) -> ChannelAccess {
        ChannelAccess {
            name: name.to_string(),
            read_history: true,
            send_messages: true,
        }
    }

    fn channels() -> ChannelConfig {
        ChannelConfig {
            eom_post: 1,
            wise_old_man: 2,
            loot_notifications: 3,
            log_notifications: 4,
            rank_change: 5,
            update: 0,
            applications_accepted: 0,
            mod_review: 0,
        }
    }

    fn roles() -> RoleConfig {
        RoleConfig {
            mediator: 11,
            sage: 12,
            destroyer: 13,
            unholy: 14,
            legend: 15,
        }
    }

    fn healthy() -> FakeGuild {
        FakeGuild {
            channels: (1..=5).map(|id| (id, open(&format!("chan-{id}")))).collect(),
            roles: (11..=15).collect(),
            manage_roles: true,
        }
    }

    #[test]
    fn healthy_guild_passes() {
        assert!(validate_guild(&healthy(), &channels(), &roles()).is_ok());
    }

    #[test]
    fn enumerates_every_setup_problem() {
        let mut guild = healthy();
        guild.channels.remove(&3);
        guild.roles.retain(|r| *r != 15);
        let mut channel_ids = channels();
        channel_ids.log_notifications = 0;
        let mut role_ids = roles();
        role_ids.sage = 0;

        let problems = setup_problems(&guild, &channel_ids, &role_ids);
        assert_eq!(
            problems,
            vec![
                "Loot Notifications channel not found (ID: 3)",
                "Log Notifications channel ID not configured",
                "Sage role ID not configured",
                "Legend role not found (ID: 15)",
            ]
        );
    }

    #[test]
    fn reports_missing_bot_permissions() {
        let mut guild = healthy();
        guild.manage_roles = false;
        guild.channels.insert(
            5,
            ChannelAccess {
                name: "rank-changes".into(),
                read_history: true,
                send_messages: false,
            },
        );
        guild.channels.get_mut(&2).unwrap().read_history = false;

        let err = validate_guild(&guild, &channels(), &roles()).unwrap_err();
        assert_eq!(
            err.problems,
            vec![
                "Missing permission: manage_roles",
                "Cannot read message history in #chan-2",
                "Cannot send messages in #rank-changes",
            ]
        );
    }

    #[test]
    fn manage_roles_comes_from_guild_permissions() {
        assert!(grants_manage_roles(Permissions::MANAGE_ROLES | Permissions::SEND_MESSAGES));
        assert!(grants_manage_roles(Permissions::ADMINISTRATOR));
        assert!(!grants_manage_roles(Permissions::MANAGE_MESSAGES | Permissions::READ_MESSAGE_HISTORY));
        assert!(!grants_manage_roles(Permissions::empty()));
    }
}
