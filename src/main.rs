// Error handling / trace logging
use anyhow::anyhow;
use tracing::info;

// Serenity
use serenity::{http::Http, prelude::*};

// Shuttle
use shuttle_secrets::SecretStore;

use std::sync::Arc;

use clan_eom::bot::Bot;
use clan_eom::config::Config;
use clan_eom::discord::{DiscordHistory, DiscordRoles};
use clan_eom::eom::{EomRunner, EomServices};
use clan_eom::executor::RoleDirectory;
use clan_eom::prices::{PriceCache, WikiPriceClient};
use clan_eom::roster::{RosterStore, SheetsRoster};
use clan_eom::scheduler::TaskScheduler;
use clan_eom::valuation::{ItemCatalog, LootValuer};
use clan_eom::wiseoldman::{StatTracker, WiseOldManClient};

#[shuttle_runtime::main]
async fn clan_eom_bot(
    #[shuttle_secrets::Secrets] secret_store: SecretStore,
) -> shuttle_serenity::ShuttleSerenity {
    let config = Arc::new(check_environment(&secret_store)?);

    // Separate REST handle so the collaborators exist before the gateway client
    let http = Arc::new(Http::new(&config.discord_token));
    let services = build_services(&config, http)?;
    let stats = Arc::clone(&services.stats);
    let roster = Arc::clone(&services.roster);
    let roles = Arc::clone(&services.roles);
    let runner = EomRunner::from_config(services, &config);
    let scheduler = Arc::new(TaskScheduler::new());

    // Set gateway intents, which decides what events the bot will be notified about
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;

    let client = Client::builder(&config.discord_token, intents)
        .event_handler(Bot::new(
            Arc::clone(&config),
            runner,
            stats,
            roster,
            roles,
            Arc::clone(&scheduler),
        ))
        .await
        .map_err(|why| anyhow!("Err creating client: {why}"))?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            scheduler.stop().await;
            shard_manager.lock().await.shutdown_all().await;
        }
    });

    Ok(client.into())
}

/// Builds every outbound collaborator. Errors surface as `anyhow` so the
/// Shuttle entry point can return them.
fn build_services(config: &Config, http: Arc<Http>) -> Result<EomServices, anyhow::Error> {
    let catalog = match config.item_catalog_json.as_deref() {
        Some(raw) => ItemCatalog::from_json(raw)?,
        None => ItemCatalog::sample(),
    };
    info!("Loaded item catalog with {} entries", catalog.len());

    let valuer = Arc::new(LootValuer::new(
        catalog,
        Arc::new(WikiPriceClient::new()?),
        PriceCache::default(),
    ));
    let roster: Arc<dyn RosterStore> = Arc::new(SheetsRoster::new(&config.sheets)?);
    let stats: Arc<dyn StatTracker> = Arc::new(WiseOldManClient::new(&config.wise_old_man)?);
    let roles: Arc<dyn RoleDirectory> =
        Arc::new(DiscordRoles::new(Arc::clone(&http), config.guild_id));

    Ok(EomServices {
        history: Arc::new(DiscordHistory::new(http)),
        roster,
        roles,
        stats,
        valuer,
    })
}

/// Secrets first, then the process environment, so local runs work with plain env vars.
fn check_environment(secret_store: &SecretStore) -> Result<Config, anyhow::Error> {
    let config = Config::from_lookup(|key| {
        secret_store
            .get(key)
            .or_else(|| std::env::var(key).ok())
    })?;
    info!(
        guild = config.guild_id,
        wom_group = config.wise_old_man.group_id,
        "Configuration loaded"
    );
    Ok(config)
}
