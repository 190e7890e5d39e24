// This is the entry point of the automod bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, seed files)
// - `discord/` = Discord-specific adapters (commands, events, platform calls)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Forward gateway events to the automod dispatcher

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::automod::{
    AutomodDeps, AutomodDispatcher, AutomodEnforcer, AutomodOptions, DispatchOptions,
    TemplateRenderer,
};
use crate::discord::automod::events::to_automod_event;
use crate::discord::automod::SerenityPlatform;
use crate::discord::{Data, Error};
use crate::infra::automod::seed_file;
use crate::infra::automod::SqliteAutomodStore;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Settings read from the environment once at startup.
struct Settings {
    token: String,
    data_dir: String,
    seed_file: Option<String>,
    points_window: Option<chrono::TimeDelta>,
    options: AutomodOptions,
    dispatch: DispatchOptions,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

// A century is already far longer than any sensible decay window.
const MAX_POINTS_WINDOW_DAYS: i64 = 36_500;

/// Parse `AUTOMOD_POINTS_WINDOW_DAYS`. Unset means points never expire.
fn parse_points_window(raw: Option<&str>) -> anyhow::Result<Option<chrono::TimeDelta>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let days: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("AUTOMOD_POINTS_WINDOW_DAYS must be a whole number, got {:?}", raw))?;
    if !(1..=MAX_POINTS_WINDOW_DAYS).contains(&days) {
        anyhow::bail!(
            "AUTOMOD_POINTS_WINDOW_DAYS must be between 1 and {}, got {}",
            MAX_POINTS_WINDOW_DAYS,
            days
        );
    }
    chrono::TimeDelta::try_days(days)
        .map(Some)
        .context("AUTOMOD_POINTS_WINDOW_DAYS is out of range")
}

impl Settings {
    fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("DISCORD_TOKEN").context(
            "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
        )?;

        let mut options = AutomodOptions::default();
        if let Some(secs) = env_parse::<u64>("AUTOMOD_DEFAULT_TIMEOUT_SECS") {
            options.default_timeout = Duration::from_secs(secs);
        }
        if let Ok(template) = std::env::var("AUTOMOD_DM_TEMPLATE") {
            options.dm_template = template;
        }

        let defaults = DispatchOptions::default();
        let dispatch = DispatchOptions {
            queue_capacity: env_parse("AUTOMOD_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            max_concurrent_per_guild: env_parse("AUTOMOD_MAX_CONCURRENT_PER_GUILD")
                .unwrap_or(defaults.max_concurrent_per_guild),
        };

        Ok(Self {
            token,
            data_dir: std::env::var("AUTOMOD_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            seed_file: std::env::var("AUTOMOD_SEED_FILE").ok(),
            points_window: parse_points_window(
                std::env::var("AUTOMOD_POINTS_WINDOW_DAYS").ok().as_deref(),
            )?,
            options,
            dispatch,
        })
    }
}

/// Event handler for non-command Discord events.
/// Every automod-relevant event is queued; enforcement happens off the gateway task.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let Some(automod_event) = to_automod_event(event) {
        let kind = automod_event.kind();
        if let Err(e) = data.dispatcher.submit(automod_event).await {
            tracing::error!(kind, error = %e, "Failed to queue automod event");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening (RUST_LOG, default info)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("Failed to create data directory {}", settings.data_dir))?;
    let automod_db_path = format!("{}/automod.db", settings.data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let store = Arc::new(
        SqliteAutomodStore::new(&automod_db_path)
            .await
            .context("Failed to initialize SQLite automod store")?
            .with_points_window(settings.points_window),
    );

    if let Some(path) = &settings.seed_file {
        let seeds = seed_file::load_seed_file(std::path::Path::new(path))?;
        seed_file::apply_seed(&store, &seeds).await?;
    }

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILD_MESSAGE_REACTIONS
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let options = settings.options.clone();
    let dispatch = settings.dispatch;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::automod::commands::automod()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!(user = %ready.user.name, "Bot is starting up...");

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // The platform needs the live HTTP client and cache, so the
                // enforcer is wired here rather than before the client exists.
                let platform = Arc::new(SerenityPlatform::new(
                    ctx.http.clone(),
                    ctx.cache.clone(),
                    ready.user.id.get(),
                ));
                let deps = AutomodDeps {
                    config_store: store.clone(),
                    rule_store: store.clone(),
                    ledger: store,
                    executor: platform.clone(),
                    directory: platform,
                    renderer: Arc::new(TemplateRenderer::new(options.dm_template.clone())),
                };
                let automod = Arc::new(AutomodEnforcer::new(deps, options));
                let dispatcher = AutomodDispatcher::spawn(automod.clone(), dispatch);

                tracing::info!("Commands registered, automod is ready");
                Ok(Data {
                    automod,
                    dispatcher,
                })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&settings.token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
