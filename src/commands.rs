use tracing::{error, info};

// Serenity
use serenity::{
    builder::CreateApplicationCommand,
    model::application::command::CommandOptionType,
    model::application::interaction::application_command::CommandDataOption,
    model::Permissions,
    utils::MessageBuilder,
};

// Utility
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::aggregator::{month_from_name, month_title};
use crate::applications::{AcceptedRank, ApplicationDecision};
use crate::eom::EomRunner;
use crate::error::{CommandError, ValidationError};
use crate::report::split_message;
use crate::roster::{find_by_external_id, RosterStore};
use crate::wiseoldman::StatTracker;

/// Only the configured EOM channel may run the pass. An unset channel is
/// reported by the guild setup check instead.
pub fn check_channel(invoked_in: u64, eom_post: u64) -> Result<(), ValidationError> {
    if eom_post != 0 && invoked_in != eom_post {
        return Err(ValidationError::WrongChannel(eom_post));
    }
    Ok(())
}

/// Manage Messages, or any role whose name is listed as a manager role.
pub fn check_caller(
    can_manage_messages: bool,
    role_names: &[String],
    manager_roles: &[String],
) -> Result<(), ValidationError> {
    let has_manager_role = role_names
        .iter()
        .any(|name| manager_roles.iter().any(|m| m == name.trim()));
    if can_manage_messages || has_manager_role {
        Ok(())
    } else {
        Err(ValidationError::NotAuthorized)
    }
}

fn option_value<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a Value> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_ref())
}

fn text_option(options: &[CommandDataOption], name: &'static str) -> Result<String, ValidationError> {
    option_value(options, name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::MissingOption(name))
}

/// Accepts a bare snowflake or a `<@id>` / `<@!id>` mention.
pub fn parse_discord_id(raw: &str) -> Result<u64, ValidationError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map(|rest| rest.trim_start_matches('!'))
        .unwrap_or(trimmed);
    digits
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| ValidationError::InvalidDiscordId(trimmed.to_string()))
}

pub struct EomCommand;

impl EomCommand {
    pub fn register(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
        command
            .name("eom")
            .description("Process end-of-month achievements and rank promotions")
            .create_option(|option| {
                option
                    .name("month")
                    .description("The month to process (e.g., 'January' or 'Jan')")
                    .kind(CommandOptionType::String)
                    .required(true)
            })
    }

    /// The `month` option, validated.
    pub fn month_option(options: &[CommandDataOption]) -> Result<String, ValidationError> {
        let value = options
            .iter()
            .find(|o| o.name == "month")
            .and_then(|o| o.value.as_ref());
        Self::month_from_value(value)
    }

    fn month_from_value(value: Option<&Value>) -> Result<String, ValidationError> {
        let month = value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(ValidationError::EmptyMonth)?;
        month_from_name(month)?;
        Ok(month.to_string())
    }

    /// Runs the pass and returns the reply plus the announcement chunks for
    /// the rank-change channel.
    pub async fn run(
        runner: &EomRunner,
        month: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, Vec<String>), CommandError> {
        let title = month_title(month_from_name(month)?);
        info!("Starting EOM processing for {}", title);

        match runner.run(month, None, now).await? {
            None => Ok((format!("ℹ️ No achievements found for {title}."), Vec::new())),
            Some(outcome) => {
                info!(
                    "EOM processing completed for {}: {} promotions",
                    title,
                    outcome.promoted().len()
                );
                Ok((outcome.summary(), outcome.execution.notification.clone()))
            }
        }
    }
}

pub struct UpdateCommand;

impl UpdateCommand {
    pub fn register(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
        command
            .name("update")
            .description("Manually trigger a Wise Old Man group update")
    }

    pub async fn run(stats: &dyn StatTracker, triggered_by: Option<u64>) -> String {
        let mut response = MessageBuilder::new();
        match stats.trigger_group_update().await {
            Ok(message) => {
                info!("Manual update completed successfully");
                response
                    .push_bold_line("✅ Update Successful")
                    .push_line("Wise Old Man group update has been triggered successfully!")
                    .push_bold("Group ID: ")
                    .push_line(stats.group_id())
                    .push_bold("Status: ")
                    .push_line(message);
                if let Some(user) = triggered_by {
                    response.push_bold("Triggered by: ").push_line(format!("<@{user}>"));
                }
            }
            Err(why) => {
                error!("Manual update failed: {}", why);
                response
                    .push_bold_line("❌ Update Failed")
                    .push_line(format!("Failed to trigger Wise Old Man update: {why}"));
            }
        }
        response.build()
    }
}

/// Process-level facts the status reply includes.
pub struct BotHealth {
    pub guilds: usize,
    pub scheduler_running: bool,
    pub next_update: DateTime<Utc>,
    pub setup_problems: Vec<String>,
}

pub struct StatusCommand;

impl StatusCommand {
    pub fn register(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
        command
            .name("status")
            .description("Check bot, roster and Wise Old Man group status")
    }

    pub async fn run(stats: &dyn StatTracker, roster: &dyn RosterStore, health: BotHealth) -> String {
        let (group, members) = tokio::join!(stats.group_info(), roster.read_members());

        let mut response = MessageBuilder::new();
        response
            .push_bold_line("🤖 Bot Status")
            .push_bold("Bot: ")
            .push_line("✅ Online and Ready")
            .push_bold("Guilds Connected: ")
            .push_line(health.guilds);

        response.push_bold("Daily Update: ");
        if health.scheduler_running {
            response.push_line(format!("✅ next run {}", health.next_update.format("%Y-%m-%d %H:%M UTC")));
        } else {
            response.push_line("❌ Stopped");
        }

        match group {
            Ok(group) => {
                response
                    .push_bold("WOM Group: ")
                    .push_line(format!("✅ {}", group.name))
                    .push_bold("Group ID: ")
                    .push_line(group.id);
                if let Some(count) = group.member_count {
                    response.push_bold("Member Count: ").push_line(count);
                }
            }
            Err(why) => {
                error!("Error getting group info: {}", why);
                response.push_bold("WOM Group: ").push_line("❌ Connection Failed");
            }
        }

        match members {
            Ok(members) => response
                .push_bold("Roster: ")
                .push_line(format!("✅ {} members", members.len())),
            Err(why) => {
                error!("Error reading roster: {}", why);
                response.push_bold("Roster: ").push_line("❌ Unreachable")
            }
        };

        response.push_bold("Guild Setup: ");
        if health.setup_problems.is_empty() {
            response.push_line("✅ OK");
        } else {
            response.push_line(format!("⚠️ {} issue(s)", health.setup_problems.len()));
            for problem in &health.setup_problems {
                response.push_line(format!("• {problem}"));
            }
        }

        response.build()
    }
}

/// `/accept_application` and `/deny_application`, the moderator side of
/// clan intake.
pub struct ApplicationCommand;

impl ApplicationCommand {
    pub fn register_accept(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
        command
            .name("accept_application")
            .description("Accept a clan application")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .create_option(|option| {
                option
                    .name("user")
                    .description("The applicant")
                    .kind(CommandOptionType::User)
                    .required(true)
            })
            .create_option(|option| {
                option
                    .name("ign")
                    .description("The applicant's in-game name")
                    .kind(CommandOptionType::String)
                    .required(true)
            })
            .create_option(|option| {
                option
                    .name("rank")
                    .description("Rank to accept the applicant at")
                    .kind(CommandOptionType::String)
                    .required(true)
                    .add_string_choice("Unholy", "unholy")
                    .add_string_choice("Friend", "friend")
            })
    }

    pub fn register_deny(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
        command
            .name("deny_application")
            .description("Deny a clan application")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .create_option(|option| {
                option
                    .name("user")
                    .description("The applicant")
                    .kind(CommandOptionType::User)
                    .required(true)
            })
            .create_option(|option| {
                option
                    .name("reason")
                    .description("Reason sent to the applicant")
                    .kind(CommandOptionType::String)
                    .required(true)
            })
    }

    /// Builds the decision for either command from its options.
    pub fn decision_from_options(
        command_name: &str,
        options: &[CommandDataOption],
    ) -> Result<ApplicationDecision, ValidationError> {
        let user_id = parse_discord_id(&text_option(options, "user")?)?;
        if command_name == "deny_application" {
            return Ok(ApplicationDecision::Deny {
                user_id,
                reason: text_option(options, "reason")?,
            });
        }
        Ok(ApplicationDecision::Accept {
            user_id,
            in_game_name: text_option(options, "ign")?,
            rank: AcceptedRank::from_choice(&text_option(options, "rank")?)?,
        })
    }
}

pub struct SearchCommand;

impl SearchCommand {
    pub fn register(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
        command
            .name("search_discord_id")
            .description("Search for a Discord ID in the roster")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .create_option(|option| {
                option
                    .name("discord_id")
                    .description("The Discord ID to look up")
                    .kind(CommandOptionType::String)
                    .required(true)
            })
    }

    pub fn discord_id_option(options: &[CommandDataOption]) -> Result<u64, ValidationError> {
        parse_discord_id(&text_option(options, "discord_id")?)
    }

    pub async fn run(roster: &dyn RosterStore, discord_id: u64) -> String {
        let mut response = MessageBuilder::new();
        match roster.read_members().await {
            Ok(members) => match find_by_external_id(&members, discord_id) {
                Some(member) => {
                    response
                        .push_bold_line("✅ Discord ID Found")
                        .push_line(format!("Found Discord ID `{discord_id}` in the roster"))
                        .push_bold("Row: ")
                        .push_line(member.row)
                        .push_bold("Name: ")
                        .push_line(&member.name)
                        .push_bold("Rank: ")
                        .push_line(member.rank.map_or("Unknown", |rank| rank.name()))
                        .push_bold("Counter: ")
                        .push_line(member.progress_counter);
                    if let Some(enrolled) = &member.enrolled_at {
                        response.push_bold("Joined: ").push_line(enrolled);
                    }
                }
                None => {
                    response
                        .push_bold_line("❌ Discord ID Not Found")
                        .push_line(format!("Discord ID `{discord_id}` was not found in the roster"));
                }
            },
            Err(why) => {
                error!("Error searching roster for {}: {}", discord_id, why);
                response
                    .push_bold_line("❌ Search Error")
                    .push_line(format!("Error searching for Discord ID: {why}"));
            }
        }
        response.build()
    }
}

/// Splits a reply into follow-up sized messages.
pub fn reply_chunks(content: &str) -> Vec<String> {
    split_message(content, crate::report::DISCORD_MESSAGE_LIMIT)
}
