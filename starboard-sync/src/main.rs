//! starboard-sync: threshold-gated mirror service
//!
//! `serve` runs the HTTP trigger surface; `rebuild` and `audit` run one
//! reconciliation job against a guild and print its report.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use starboard_common::config::{load_config, resolve_database_path, TomlConfig};
use starboard_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use starboard_sync::external::discord::DiscordClient;
use starboard_sync::types::GuildId;
use starboard_sync::{build_router, AppState, EVENT_BUS_CAPACITY};

const DEFAULT_LISTEN: &str = "127.0.0.1:5780";

#[derive(Parser, Debug)]
#[command(name = "starboard-sync")]
#[command(about = "Mirror highlighted messages into a starboard channel")]
#[command(version)]
struct Args {
    /// Config file (default: ~/.config/starboard/config.toml)
    #[arg(short, long, env = "STARBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP trigger surface
    Serve {
        /// Listen address, overrides the config file
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Delete and recreate every mirror post of a guild
    Rebuild {
        #[arg(long)]
        guild: GuildId,
        /// Skip throttling and recreate regardless of the live count (asks for confirmation)
        #[arg(long)]
        fast: bool,
    },
    /// Verify every mirror entry of a guild and repair drift
    Audit {
        #[arg(long)]
        guild: GuildId,
        /// Skip throttling (asks for confirmation)
        #[arg(long)]
        fast: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("starboard_sync={0},starboard_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting starboard-sync v{}", env!("CARGO_PKG_VERSION"));

    let db_path = resolve_database_path(args.database.as_deref(), &config);
    info!("Database path: {}", db_path.display());
    let pool = starboard_sync::db::init_database_pool(&db_path).await?;

    let token = config
        .resolve_token()
        .context("Discord token missing: set DISCORD_TOKEN or [discord] token")?;
    let client = DiscordClient::new(token, config.discord.api_base.clone())?;
    let state = AppState::new(pool, Arc::new(client), &config, EventBus::new(EVENT_BUS_CAPACITY));

    match args.command {
        Command::Serve { listen } => serve(state, &config, listen).await,
        Command::Rebuild { guild, fast } => {
            if fast {
                confirm_override(&state, guild).await?;
            }
            let report = state.reconciler.run_rebuild(guild, fast).await?;
            println!("{}", report.summary());
            print_failures(&report.failures);
            Ok(())
        }
        Command::Audit { guild, fast } => {
            if fast {
                confirm_override(&state, guild).await?;
            }
            let report = state.reconciler.run_audit_repair(guild, fast).await?;
            println!("{}", report.summary());
            print_failures(&report.failures);
            Ok(())
        }
    }
}

async fn serve(state: AppState, config: &TomlConfig, listen: Option<String>) -> Result<()> {
    let addr = listen
        .or_else(|| config.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("starboard-sync listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Challenge/response on the terminal before a fast job
async fn confirm_override(state: &AppState, guild_id: GuildId) -> Result<()> {
    let challenge = state.reconciler.gate().request(guild_id);
    println!(
        "Fast mode skips rate limiting and can get the bot throttled by Discord.\n\
         Type {} within {} seconds to continue:",
        challenge.code, challenge.expires_in_seconds
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let answer = lines.next_line().await?.unwrap_or_default();
    state.reconciler.gate().confirm(guild_id, &answer)?;
    Ok(())
}

fn print_failures(failures: &[starboard_sync::reconcile::ItemFailure]) {
    for failure in failures {
        println!("  message {}: {}", failure.origin_id, failure.error);
    }
}
