use clap::{Args, Parser, Subcommand};

use crate::types::{Category, ItemKind, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "activity-mirror",
    version,
    about = "Mirror users' platform activity into their private document stores"
)]
pub struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Path of the user state database
    #[arg(
        long,
        env = "MIRROR_DB_PATH",
        default_value = "~/.activity-mirror/state.db",
        global = true
    )]
    pub db_path: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sweep all registered users on a timer until stopped
    Run(EngineArgs),

    /// Sync one user now, ignoring the resync gap and inactivity
    Sync(SyncArgs),

    /// Show sweep history, or one user's cursors
    Status(StatusArgs),

    /// Register a user, or refresh a returning user's platform token
    Register(RegisterArgs),

    /// Clear everything stored for a user
    Purge(PurgeArgs),

    /// Remove an item from a user's platform listing
    DeleteItem(DeleteItemArgs),

    /// Print the current text of one of a user's comments
    Comment(CommentArgs),

    /// Mark a user active now so sweeps resume syncing them
    Touch(UserArgs),
}

/// Everything needed to talk to the platform, the stores and the mail relay.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Passphrase that encrypts credentials at rest.
    /// Prefer the MIRROR_SECRET_KEY environment variable.
    #[arg(long, env = "MIRROR_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Platform OAuth application id
    #[arg(long, env = "MIRROR_CLIENT_ID")]
    pub client_id: String,

    /// Platform OAuth application secret
    #[arg(long, env = "MIRROR_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// User-Agent sent to the platform API
    #[arg(long, default_value = concat!("activity-mirror/", env!("CARGO_PKG_VERSION")))]
    pub user_agent: String,

    /// Timeout for each HTTP request (e.g. 30s, 2m)
    #[arg(long, default_value = "30s")]
    pub http_timeout: String,

    /// Retries for a failed HTTP request (429, 5xx, connection errors)
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Base delay between HTTP retries
    #[arg(long, default_value = "2s")]
    pub retry_delay: String,

    /// JSON mail relay endpoint; notices are only logged when unset
    #[arg(long, env = "MIRROR_MAIL_RELAY_URL")]
    pub mail_relay_url: Option<String>,

    /// Sender address for notices
    #[arg(long, default_value = "noreply@activity-mirror.local")]
    pub mail_from: String,

    /// Site URL linked from notices
    #[arg(long, env = "MIRROR_SITE_URL", default_value = "http://localhost:3000")]
    pub site_url: String,

    /// Time between sweep ticks
    #[arg(long, default_value = "60s")]
    pub sweep_interval: String,

    /// Minimum time between two syncs of the same user
    #[arg(long, default_value = "30s")]
    pub min_resync: String,

    /// Idle time after which a user is no longer synced
    #[arg(long, default_value = "180d")]
    pub inactive_after: String,

    /// Minimum time between two inactivity notices
    #[arg(long, default_value = "90d")]
    pub inactive_notice_every: String,

    /// Minimum time between two update-failure notices
    #[arg(long, default_value = "30d")]
    pub update_failed_notice_every: String,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[arg(short = 'u', long)]
    pub username: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show this user's cursors instead of the sweep summary
    #[arg(short = 'u', long)]
    pub username: Option<String>,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[arg(short = 'u', long)]
    pub username: String,

    /// Platform OAuth refresh token
    #[arg(long, env = "MIRROR_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: String,

    /// URL of the user's document database
    #[arg(long)]
    pub store_url: String,

    /// Auth token for the user's document database
    #[arg(long, env = "MIRROR_STORE_TOKEN", hide_env_values = true)]
    pub store_token: String,

    /// Address for account notices
    #[arg(long)]
    pub email: Option<String>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    #[arg(short = 'u', long)]
    pub username: String,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct DeleteItemArgs {
    #[arg(short = 'u', long)]
    pub username: String,

    #[arg(long, value_enum)]
    pub category: Category,

    #[arg(long, value_enum)]
    pub kind: ItemKind,

    /// Item id without its kind prefix
    #[arg(long)]
    pub id: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct CommentArgs {
    #[arg(short = 'u', long)]
    pub username: String,

    /// Comment id without its kind prefix
    #[arg(long)]
    pub id: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct UserArgs {
    #[arg(short = 'u', long)]
    pub username: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}
