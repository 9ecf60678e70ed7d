//! activity-mirror: keeps each registered user's platform activity (saved,
//! created, voted, hidden and awarded items) mirrored into that user's own
//! document database.
//!
//! A sweep runs on a timer over every registered user. Each sync fetches
//! only what is newer than the stored per-listing cursors, merges queued
//! backfill imports, resolves source icons within the platform's rate-limit
//! budget, and commits everything in one step.

#![warn(clippy::all)]

mod cli;
mod config;
mod crypto;
mod notify;
mod platform;
mod retry;
mod shutdown;
mod state;
mod store;
mod sync;
mod types;

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use crypto::SecretBox;
use notify::{BroadcastSink, ConnectionRegistry, LogMailer, Mailer, Notifier, RelayMailer};
use platform::http::{HttpPlatformConfig, HttpPlatformConnector};
use state::{SqliteUserStore, UserStore};
use store::rtdb::RtdbDocumentStore;
use store::StoreCredential;
use sync::account::{Registration, RegisterOutcome};
use sync::{CommitStatus, EngineDeps, Scheduler, SyncEngine, SyncReport};
use types::Category;

/// Capacity of the in-process event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A wired engine plus the pieces `run` needs direct access to.
struct App {
    engine: Arc<SyncEngine>,
    users: Arc<SqliteUserStore>,
    registry: Arc<ConnectionRegistry>,
    events: Arc<BroadcastSink>,
}

async fn build_app(config: &Config) -> anyhow::Result<App> {
    let users = Arc::new(SqliteUserStore::open(&config.db_path).await?);
    let cipher = Arc::new(SecretBox::from_passphrase(&config.secret_key)?);

    let mut platform_config = HttpPlatformConfig::new(
        config.client_id.clone(),
        config.client_secret.clone(),
        config.user_agent.clone(),
    );
    platform_config.timeout = config.http_timeout;
    platform_config.retry = config.retry.clone();
    let platform = Arc::new(HttpPlatformConnector::new(platform_config)?);

    let documents = Arc::new(RtdbDocumentStore::new(
        config.http_timeout,
        config.retry.clone(),
    )?);

    let mailer: Arc<dyn Mailer> = match &config.mail_relay_url {
        Some(url) => Arc::new(RelayMailer::new(
            url.clone(),
            config.http_timeout,
            config.retry.clone(),
        )?),
        None => {
            tracing::info!("No mail relay configured, notices will only be logged");
            Arc::new(LogMailer)
        }
    };
    let notifier = Notifier::new(
        mailer,
        cipher.clone(),
        config.mail_from.clone(),
        config.site_url.clone(),
    );

    let registry = Arc::new(ConnectionRegistry::new());
    let events = Arc::new(BroadcastSink::new(EVENT_CHANNEL_CAPACITY));

    let engine = Arc::new(SyncEngine::new(
        EngineDeps {
            users: users.clone(),
            documents,
            platform,
            cipher,
            notifier,
            registry: registry.clone(),
            events: events.clone(),
        },
        config.policy,
    ));

    Ok(App {
        engine,
        users,
        registry,
        events,
    })
}

fn format_epoch(epoch: Option<i64>) -> String {
    epoch
        .and_then(|e| DateTime::<Utc>::from_timestamp(e, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// Run the sweep service until a shutdown signal arrives.
async fn run_service(config: Config) -> anyhow::Result<()> {
    let app = build_app(&config).await?;
    let usernames = app.users.list_all_non_purged_usernames().await?;
    tracing::info!(
        users = usernames.len(),
        interval_secs = config.sweep_interval.as_secs(),
        "Starting sweep service"
    );
    app.registry.populate(usernames);

    let mut events = app.events.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok((connection, event)) => {
                    tracing::debug!(%connection, ?event, "Event emitted");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = shutdown::install_signal_handler()?;
    Scheduler::new(app.engine, config.sweep_interval)
        .run(shutdown)
        .await;
    tracing::info!("Sweep service stopped");
    Ok(())
}

fn print_report(username: &str, report: &SyncReport) {
    println!("Synced {username}");
    let synced: Vec<&str> = report.synced.iter().map(Category::as_str).collect();
    println!("  Categories synced: {}", synced.join(", "));
    for failure in &report.failures {
        println!("  {} failed: {}", failure.category, failure.error);
    }
    match &report.commit {
        CommitStatus::Committed => println!("  Items written:     {}", report.items_written),
        CommitStatus::NothingToCommit => println!("  Nothing committed"),
        CommitStatus::Failed(e) => println!("  Commit failed:     {e}"),
    }
}

async fn run_sync(config: Config, username: &str) -> anyhow::Result<()> {
    let app = build_app(&config).await?;
    let report = sync::sync_once(&app.engine, username, Utc::now().timestamp()).await?;
    print_report(username, &report);
    if !report.is_clean() {
        anyhow::bail!("sync of {username} did not complete cleanly");
    }
    Ok(())
}

async fn run_status(db_path: &Path, username: Option<&str>) -> anyhow::Result<()> {
    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Register a user first to create the database.");
        return Ok(());
    }
    let users = SqliteUserStore::open(db_path).await?;

    let Some(username) = username else {
        let summary = users.get_summary().await?;
        println!("State Database: {}", users.path().display());
        println!();
        println!("Users:");
        println!("  Total:      {}", summary.total_users);
        println!("  Active:     {}", summary.active_users);
        println!("  Onboarded:  {}", summary.onboarded_users);
        println!();
        if let Some(started) = &summary.last_sweep_started {
            println!(
                "Last sweep started:   {}",
                started.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        if let Some(completed) = &summary.last_sweep_completed {
            println!(
                "Last sweep completed: {}",
                completed.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        if let Some(stats) = &summary.last_sweep_stats {
            println!(
                "  seen {}, synced {}, failed {}, skipped {}{}",
                stats.users_seen,
                stats.users_synced,
                stats.users_failed,
                stats.users_skipped,
                if stats.interrupted { " (interrupted)" } else { "" }
            );
        }
        return Ok(());
    };

    let Some(user) = users.get_user(username).await? else {
        anyhow::bail!("No user named {username}");
    };
    if user.is_purged() {
        println!("{username} has been purged");
        return Ok(());
    }
    println!("User: {username}");
    println!("  Last synced: {}", format_epoch(user.last_updated_epoch));
    println!("  Last active: {}", format_epoch(user.last_active_epoch));
    println!();
    for category in Category::ALL {
        let info = user.sync_info.get(category);
        println!(
            "  {category:<10} new data: {}",
            format_epoch(info.latest_new_data_epoch)
        );
        for &slot in category.slots() {
            println!(
                "    {slot:<9} cursor: {}",
                info.cursor(slot).unwrap_or("none")
            );
        }
    }
    Ok(())
}

async fn run_register(config: Config, args: cli::RegisterArgs) -> anyhow::Result<()> {
    let app = build_app(&config).await?;
    let registration = Registration {
        username: args.username,
        refresh_token: args.refresh_token,
        store_credential: StoreCredential {
            database_url: args.store_url,
            auth_token: args.store_token,
        },
        email: args.email,
    };
    let username = registration.username.clone();
    match app
        .engine
        .register_user(registration, Utc::now().timestamp())
        .await?
    {
        RegisterOutcome::Created => println!("Registered {username}"),
        RegisterOutcome::TokenRefreshed => println!("Refreshed platform token for {username}"),
    }
    Ok(())
}

async fn run_purge(config: Config, username: &str, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!("This will erase every stored credential and cursor of {username}.");
        print!("Are you sure? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }
    let app = build_app(&config).await?;
    app.engine.purge_user(username).await?;
    println!("Purged {username}");
    Ok(())
}

async fn run_delete_item(config: Config, args: &cli::DeleteItemArgs) -> anyhow::Result<()> {
    let app = build_app(&config).await?;
    let replaced = app
        .engine
        .delete_item(&args.username, args.category, args.kind, &args.id)
        .await?;
    println!(
        "Removed {} from {}'s {} listing",
        args.kind.fullname(&args.id),
        args.username,
        args.category
    );
    if replaced {
        println!("The stored cursor pointed at it and was moved to the listing head");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let db_path = cli.db_path;
    match cli.command {
        Command::Run(args) => run_service(Config::from_cli(&db_path, args)?).await,
        Command::Sync(args) => {
            run_sync(Config::from_cli(&db_path, args.engine)?, &args.username).await
        }
        Command::Status(args) => {
            run_status(&config::expand_tilde(&db_path), args.username.as_deref()).await
        }
        Command::Register(args) => {
            let config = Config::from_cli(&db_path, args.engine.clone())?;
            run_register(config, args).await
        }
        Command::Purge(args) => {
            run_purge(Config::from_cli(&db_path, args.engine)?, &args.username, args.yes).await
        }
        Command::DeleteItem(args) => {
            let config = Config::from_cli(&db_path, args.engine.clone())?;
            run_delete_item(config, &args).await
        }
        Command::Comment(args) => {
            let app = build_app(&Config::from_cli(&db_path, args.engine)?).await?;
            let body = app
                .engine
                .fetch_comment_body(&args.username, &args.id)
                .await?;
            println!("{body}");
            Ok(())
        }
        Command::Touch(args) => {
            let app = build_app(&Config::from_cli(&db_path, args.engine)?).await?;
            app.engine
                .touch_active(&args.username, Utc::now().timestamp())
                .await?;
            println!("Marked {} active", args.username);
            Ok(())
        }
    }
}
