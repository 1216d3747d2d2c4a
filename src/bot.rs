// Serenity imports
use serenity::client::{Context, EventHandler};
use serenity::http::Http;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::{Interaction, InteractionResponseType};
use serenity::model::gateway::Ready;
use serenity::model::id::{GuildId, UserId};
use serenity::model::Permissions;
use serenity::async_trait;

// Error and logging imports
use anyhow::anyhow;
use tracing::{error, info, warn};

// Utility
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Local imports
use crate::aggregator::{month_from_name, month_title};
use crate::applications::ApplicationDesk;
use crate::commands::{
    self, ApplicationCommand, BotHealth, EomCommand, SearchCommand, StatusCommand, UpdateCommand,
};
use crate::config::Config;
use crate::discord::send_chunks;
use crate::eom::EomRunner;
use crate::error::{CommandError, SetupError, ValidationError};
use crate::executor::RoleDirectory;
use crate::guild::{setup_problems, validate_guild, CachedGuild};
use crate::roster::RosterStore;
use crate::scheduler::{next_run, TaskScheduler};
use crate::wiseoldman::StatTracker;

pub struct Bot {
    pub config: Arc<Config>,
    pub runner: EomRunner,
    pub stats: Arc<dyn StatTracker>,
    pub roster: Arc<dyn RosterStore>,
    pub roles: Arc<dyn RoleDirectory>,
    pub scheduler: Arc<TaskScheduler>,
    started: AtomicBool,
}

impl Bot {
    pub fn new(
        config: Arc<Config>,
        runner: EomRunner,
        stats: Arc<dyn StatTracker>,
        roster: Arc<dyn RosterStore>,
        roles: Arc<dyn RoleDirectory>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            config,
            runner,
            stats,
            roster,
            roles,
            scheduler,
            started: AtomicBool::new(false),
        }
    }

    /// Validates the invocation, then runs the month. Announcements go to the
    /// rank-change channel before the summary is returned.
    async fn handle_eom(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
    ) -> Result<String, CommandError> {
        let month = EomCommand::month_option(&command.data.options)?;
        commands::check_channel(command.channel_id.0, self.config.channels.eom_post)?;

        self.authorize(ctx, command, Permissions::MANAGE_MESSAGES)?;

        let guild = CachedGuild::load(ctx, GuildId(self.config.guild_id))
            .await
            .ok_or_else(|| SetupError {
                problems: vec![format!("Guild {} is not available", self.config.guild_id)],
            })?;
        validate_guild(&guild, &self.config.channels, &self.config.roles)?;

        let progress = format!(
            "🔄 Processing {} achievements and promotions...",
            month_title(month_from_name(&month)?)
        );
        if let Err(why) = command
            .create_followup_message(&ctx.http, |m| m.content(progress))
            .await
        {
            warn!("Cannot send progress message: {:?}", why);
        }

        let (summary, announcement) = EomCommand::run(&self.runner, &month, Utc::now()).await?;
        if !announcement.is_empty() {
            match send_chunks(&ctx.http, self.config.channels.rank_change, &announcement).await {
                Ok(()) => info!("Posted promotion notifications"),
                Err(why) => error!("Failed to post promotion notifications: {}", why),
            }
        }
        Ok(summary)
    }

    /// Callers need `permission` (or Administrator) or one of the manager roles.
    fn authorize(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
        permission: Permissions,
    ) -> Result<(), ValidationError> {
        let member = command.member.as_ref().ok_or(ValidationError::NotInGuild)?;
        let has_permission = member
            .permissions
            .map(|p| p.administrator() || p.contains(permission))
            .unwrap_or(false);
        let role_names: Vec<String> = member
            .roles
            .iter()
            .filter_map(|id| ctx.cache.role(member.guild_id, *id))
            .map(|role| role.name)
            .collect();
        commands::check_caller(has_permission, &role_names, &self.config.manager_roles)
    }

    /// Applies an accept or deny decision, then posts the welcome, the
    /// duplicate review and the denial DM where they apply.
    async fn handle_application(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
    ) -> Result<String, CommandError> {
        let decision =
            ApplicationCommand::decision_from_options(&command.data.name, &command.data.options)?;
        self.authorize(ctx, command, Permissions::MANAGE_ROLES)?;

        let desk = ApplicationDesk::new(
            self.roster.as_ref(),
            self.roles.as_ref(),
            &self.config.applications,
        );
        let outcome = desk.process(decision, Utc::now().naive_utc().date()).await;

        if let Some(welcome) = outcome.announcement() {
            self.post(ctx, self.config.channels.applications_accepted, welcome, "acceptance")
                .await;
        }
        if let Some(review) = outcome.duplicate_review() {
            self.post(ctx, self.config.channels.mod_review, review, "duplicate review")
                .await;
        }
        if let Some(notice) = outcome.denial_notice() {
            let user_id = UserId(outcome.decision.user_id());
            match user_id.create_dm_channel(&ctx.http).await {
                Ok(dm) => {
                    if let Err(why) = dm.say(&ctx.http, notice).await {
                        warn!("Could not send denial DM to user {}: {:?}", user_id.0, why);
                    }
                }
                Err(why) => warn!("Could not open DM with user {}: {:?}", user_id.0, why),
            }
        }

        Ok(outcome.reply(command.user.id.0))
    }

    async fn handle_search(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
    ) -> Result<String, CommandError> {
        let discord_id = SearchCommand::discord_id_option(&command.data.options)?;
        self.authorize(ctx, command, Permissions::ADMINISTRATOR)?;
        Ok(SearchCommand::run(self.roster.as_ref(), discord_id).await)
    }

    async fn post(&self, ctx: &Context, channel: u64, message: String, what: &str) {
        if channel == 0 {
            warn!("No channel configured for the {} post", what);
            return;
        }
        if let Err(why) = send_chunks(&ctx.http, channel, &[message]).await {
            error!("Failed to post {}: {}", what, why);
        }
    }

    async fn health(&self, ctx: &Context) -> BotHealth {
        let setup = match CachedGuild::load(ctx, GuildId(self.config.guild_id)).await {
            Some(guild) => setup_problems(&guild, &self.config.channels, &self.config.roles),
            None => vec![format!("Guild {} is not available", self.config.guild_id)],
        };
        BotHealth {
            guilds: ctx.cache.guild_count(),
            scheduler_running: self.scheduler.is_running(),
            next_update: next_run(Utc::now(), &self.config.schedule),
            setup_problems: setup,
        }
    }

    async fn start_background(&self, http: Arc<Http>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let stats = Arc::clone(&self.stats);
        let task_http = Arc::clone(&http);
        let channel = self.config.channels.update;
        self.scheduler
            .schedule_daily("wom-group-update", self.config.schedule, move || {
                let stats = Arc::clone(&stats);
                let http = Arc::clone(&task_http);
                async move { scheduled_update(stats.as_ref(), &http, channel).await }
            })
            .await;

        if channel != 0 {
            let schedule = self.config.schedule;
            let message = format!(
                "🤖 **Bot Online**\nDaily Wise Old Man update scheduled for {:02}:{:02} (UTC{:+}).",
                schedule.hour, schedule.minute, schedule.utc_offset_hours
            );
            if let Err(why) = send_chunks(&http, channel, &[message]).await {
                warn!("Could not post startup message: {}", why);
            }
        }
    }
}

/// The daily sync. Failures are reported to the update channel and returned
/// so the scheduler backs off.
async fn scheduled_update(
    stats: &dyn StatTracker,
    http: &Http,
    channel: u64,
) -> Result<(), anyhow::Error> {
    let result = stats.trigger_group_update().await;
    let message = match &result {
        Ok(status) => format!("✅ **Scheduled Update Complete**\n{status}"),
        Err(why) => format!("❌ **Scheduled Update Failed**\n{why}"),
    };
    if channel != 0 {
        if let Err(why) = send_chunks(http, channel, &[message]).await {
            warn!("Could not report scheduled update: {}", why);
        }
    }
    result.map(|_| ()).map_err(|why| anyhow!(why))
}

#[async_trait]
impl EventHandler for Bot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
        let guild_id = GuildId(self.config.guild_id);

        let registered = GuildId::set_application_commands(&guild_id, &ctx.http, |commands| {
            commands
                .create_application_command(|command| EomCommand::register(command))
                .create_application_command(|command| UpdateCommand::register(command))
                .create_application_command(|command| StatusCommand::register(command))
                .create_application_command(|command| ApplicationCommand::register_accept(command))
                .create_application_command(|command| ApplicationCommand::register_deny(command))
                .create_application_command(|command| SearchCommand::register(command))
        })
        .await;

        match registered {
            Ok(commands) => info!(
                "Successfully registered application commands: {:?}",
                commands.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
            ),
            Err(why) => error!("Cannot register application commands: {:?}", why),
        }

        self.start_background(Arc::clone(&ctx.http)).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::ApplicationCommand(command) = interaction else {
            return;
        };
        info!(
            user = %command.user.name,
            user_id = command.user.id.0,
            guild = ?command.guild_id.map(|g| g.0),
            command = %command.data.name,
            "Command used"
        );

        let deferred = command
            .create_interaction_response(&ctx.http, |response| {
                response.kind(InteractionResponseType::DeferredChannelMessageWithSource)
            })
            .await;
        if let Err(why) = deferred {
            error!("Cannot respond to slash command: {:?}", why);
            return;
        }

        let reply = match command.data.name.as_str() {
            "eom" => self.handle_eom(&ctx, &command).await,
            "accept_application" | "deny_application" => {
                self.handle_application(&ctx, &command).await
            }
            "search_discord_id" => self.handle_search(&ctx, &command).await,
            "update" => Ok(UpdateCommand::run(self.stats.as_ref(), Some(command.user.id.0)).await),
            "status" => {
                let health = self.health(&ctx).await;
                Ok(StatusCommand::run(self.stats.as_ref(), self.roster.as_ref(), health).await)
            }
            other => {
                warn!("Unknown command: {}", other);
                Ok(format!("Unknown command: {other}"))
            }
        };

        let content = reply.unwrap_or_else(|why| {
            match &why {
                CommandError::Validation(_) | CommandError::Setup(_) => {
                    warn!(command = %command.data.name, "Command rejected: {}", why)
                }
                _ => error!(command = %command.data.name, "Command failed: {:?}", why),
            }
            why.user_message()
        });

        for chunk in commands::reply_chunks(&content) {
            if let Err(why) = command
                .create_followup_message(&ctx.http, |m| m.content(chunk))
                .await
            {
                error!("Cannot send follow-up message: {:?}", why);
                break;
            }
        }
    }
}
