use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "clipsync",
    version,
    about = "Keep a local clip store in sync with the Twitch clips API"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler: checkpointed sync, fast poll and daily stats
    Run(RunArgs),

    /// Run a single sync invocation
    Sync(SyncArgs),

    /// Rescan the trailing six days once without moving the checkpoint
    Poll(PollArgs),

    /// Show clip store and checkpoint status
    Status(StoreArgs),

    /// Record today's clip statistics snapshot
    Stats(StoreArgs),

    /// Clear the checkpoint or set it to a given timestamp
    ResetCheckpoint(ResetCheckpointArgs),
}

/// Where the clip store and checkpoint live.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Path to the SQLite clip store
    #[arg(long, env = "CLIPSYNC_DB", default_value = "~/.clipsync/clips.db")]
    pub db: String,

    /// Keep the checkpoint in this file instead of the database
    #[arg(long, env = "CLIPSYNC_CHECKPOINT_FILE")]
    pub checkpoint_file: Option<String>,
}

/// Twitch credentials and HTTP behaviour.
#[derive(Args, Debug, Clone)]
pub struct TwitchArgs {
    /// Twitch application client id
    #[arg(long, env = "TWITCH_CLIENT_ID")]
    pub client_id: String,

    /// Twitch application client secret.
    /// Prefer the TWITCH_CLIENT_SECRET environment variable; flags are
    /// visible in process listings.
    #[arg(long, env = "TWITCH_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Broadcaster whose clips are synced
    #[arg(long, env = "BROADCASTER_ID")]
    pub broadcaster_id: String,

    /// Helix API base URL
    #[arg(long, default_value = crate::twitch::client::DEFAULT_API_BASE)]
    pub api_base: String,

    /// OAuth token endpoint
    #[arg(long, default_value = crate::twitch::client::DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Max retries for transient API failures (0 = no retries)
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub twitch: TwitchArgs,

    /// Seconds between checkpointed syncs
    #[arg(long, default_value_t = 300)]
    pub sync_interval: u64,

    /// Seconds between fast polls
    #[arg(long, default_value_t = 60)]
    pub fast_poll_interval: u64,

    /// Seconds between daily statistics snapshots
    #[arg(long, default_value_t = 86_400)]
    pub stats_interval: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub twitch: TwitchArgs,

    /// Window start overriding the checkpoint (2024-01-02T00:00:00Z, 2024-01-02 or 6d)
    #[arg(long)]
    pub since: Option<String>,

    /// Compute but do not write the checkpoint
    #[arg(long)]
    pub no_checkpoint: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub twitch: TwitchArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ResetCheckpointArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Set the checkpoint to this timestamp instead of clearing it
    #[arg(long)]
    pub to: Option<String>,

    /// Skip confirmation prompt
    #[arg(long)]
    pub yes: bool,
}
