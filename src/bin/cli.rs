//! Digester CLI
//!
//! Serves the schedule API with in-process cron triggers, or runs a single
//! schedule on demand.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use digester::{
    api,
    config::load_config,
    error::Result,
    models::Config,
    pipeline::DigestRunner,
    services::{RedditClient, ScheduleService, build_mailer},
    storage::{SqliteStore, Store},
    trigger::{CronTrigger, RunRegistry},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Digester - keyword digests of new subreddit posts
#[derive(Parser, Debug)]
#[command(
    name = "digester",
    version,
    about = "Emails scheduled digests of new subreddit posts matching a keyword"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the schedule API and fire registered schedules
    Serve,

    /// Run one schedule now
    Run {
        /// Schedule id
        schedule_id: Uuid,
    },

    /// Validate the configuration file
    Validate,

    /// Apply database migrations
    Migrate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&config.database).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn build_runner(config: &Config, store: Arc<dyn Store>) -> Result<Arc<DigestRunner>> {
    let provider = Arc::new(RedditClient::new(config.reddit.clone())?);
    let mailer = build_mailer(
        &config.mailer,
        std::time::Duration::from_secs(config.notify.send_timeout_secs),
    )?;
    Ok(Arc::new(DigestRunner::new(config, store, provider, mailer)))
}

/// Cancel `token` on Ctrl-C.
async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
    }
    log::info!("Shutdown requested");
    token.cancel();
}

async fn serve(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let runner = build_runner(config, store.clone())?;

    let shutdown = CancellationToken::new();
    let trigger =
        Arc::new(CronTrigger::new(runner, RunRegistry::new(), shutdown.clone()).await?);
    let service = Arc::new(ScheduleService::new(store, trigger.clone()));

    service.reconcile().await?;
    trigger.start().await?;

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Listening on {}", addr);

    axum::serve(listener, api::router(service))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    trigger.shutdown(config.run.shutdown_grace()).await?;
    Ok(())
}

async fn run_once(config: &Config, schedule_id: Uuid) -> Result<()> {
    let store = open_store(config).await?;
    let runner = build_runner(config, store)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    // The store's run lease keeps this from overlapping a run fired by `serve`.
    let report = runner.run(schedule_id, &cancel).await?;
    log::info!(
        "Run finished: {} sources, {} fetched, {} in digest, sent={}, cursors advanced={}",
        report.sources,
        report.fetched,
        report.digested,
        report.commit.sent,
        report.commit.cursors_advanced
    );
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli.config)?;
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Serve => serve(&config).await?,
        Command::Run { schedule_id } => run_once(&config, schedule_id).await?,
        Command::Validate => {
            log::info!("✓ Config OK");
        }
        Command::Migrate => {
            open_store(&config).await?;
            log::info!("Migrations applied to {}", config.database.url);
        }
    }

    Ok(())
}
