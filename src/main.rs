//! clipsync: incremental sync of a broadcaster's Twitch clips into a local
//! SQLite store.
//!
//! A checkpointed sync advances a persisted lower bound through the clip
//! history while a fast poll rescans the trailing week for late clips and
//! view-count changes. Both share one engine guarded against overlap.

#![warn(clippy::all)]

mod checkpoint;
mod cli;
mod config;
pub mod retry;
mod scheduler;
mod shutdown;
mod state;
mod sync;
#[cfg(test)]
mod test_support;
mod twitch;
mod types;

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use checkpoint::{CheckpointStore, FileCheckpoint};
use cli::{Command, StoreArgs, TwitchArgs};
use config::{Config, StoreConfig};
use scheduler::{ScheduleConfig, Scheduler};
use state::{ClipStore, InstanceLock, SqliteClipStore};
use sync::{CheckpointTarget, SyncEngine, SyncReport};
use twitch::HelixClient;

/// Open the store and pick the checkpoint backend.
async fn open_store(
    store: &StoreConfig,
) -> anyhow::Result<(Arc<SqliteClipStore>, Arc<dyn CheckpointStore>)> {
    let db = Arc::new(SqliteClipStore::open(&store.db_path).await?);
    let checkpoint: Arc<dyn CheckpointStore> = match &store.checkpoint_file {
        Some(path) => Arc::new(FileCheckpoint::new(path)),
        None => db.clone(),
    };
    Ok((db, checkpoint))
}

/// Build the engine for a command that talks to Twitch. The returned lock
/// must be held for as long as the engine is used.
async fn build_engine(
    store_args: &StoreArgs,
    twitch_args: TwitchArgs,
) -> anyhow::Result<(SyncEngine, InstanceLock)> {
    let config = Config::from_args(store_args, twitch_args)?;
    tracing::debug!(?config, "Loaded configuration");

    let lock = InstanceLock::acquire(&config.store.db_path).await?;
    let db = Arc::new(SqliteClipStore::open(&config.store.db_path).await?);
    let checkpoint = match &config.store.checkpoint_file {
        Some(path) => CheckpointTarget::External(Arc::new(FileCheckpoint::new(path))),
        None => CheckpointTarget::Store,
    };
    let api = Arc::new(HelixClient::new(config.helix)?);

    tracing::info!(
        db = %config.store.db_path.display(),
        checkpoint_file = config
            .store
            .checkpoint_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<database>".to_string()),
        broadcaster_id = %config.sync.broadcaster_id,
        "Clip store ready"
    );

    Ok((SyncEngine::new(api, db, checkpoint, config.sync), lock))
}

fn print_report(report: &SyncReport) {
    println!("Mode:         {}", report.mode.as_str());
    println!("Window start: {}", report.window_start);
    if let Some(before) = &report.checkpoint_before {
        println!("Previous:     {before}");
    }
    println!("Pages:        {}", report.pages);
    println!("Clips seen:   {}", report.clips_seen);
    println!("Inserted:     {}", report.inserted);
    println!("Updated:      {}", report.updated);
    match (&report.checkpoint_written, &report.reconciled_checkpoint) {
        (Some(written), _) => println!("Checkpoint:   {written}"),
        (None, Some(computed)) => println!("Checkpoint:   unchanged (computed {computed})"),
        (None, None) => println!("Checkpoint:   unchanged"),
    }
}

async fn run_daemon(args: cli::RunArgs) -> anyhow::Result<()> {
    let schedule = ScheduleConfig {
        sync_interval: Duration::from_secs(args.sync_interval.max(1)),
        fast_poll_interval: Duration::from_secs(args.fast_poll_interval.max(1)),
        stats_interval: Duration::from_secs(args.stats_interval.max(1)),
    };
    let (engine, _lock) = build_engine(&args.store, args.twitch).await?;

    let shutdown = shutdown::install_signal_handler();
    Scheduler::new(Arc::new(engine), schedule)
        .run(shutdown)
        .await;
    Ok(())
}

async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let since = args
        .since
        .as_deref()
        .map(|s| config::parse_since(s, Utc::now()))
        .transpose()?;
    let (engine, _lock) = build_engine(&args.store, args.twitch).await?;
    let report = engine.sync(since, !args.no_checkpoint).await?;
    print_report(&report);
    Ok(())
}

async fn run_poll(args: cli::PollArgs) -> anyhow::Result<()> {
    let (engine, _lock) = build_engine(&args.store, args.twitch).await?;
    let report = engine.fast_poll().await?;
    print_report(&report);
    Ok(())
}

async fn run_status(args: StoreArgs) -> anyhow::Result<()> {
    let store = StoreConfig::from_args(&args);
    if !store.db_path.exists() {
        println!("No clip store found at {}", store.db_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let (db, checkpoint) = open_store(&store).await?;
    let summary = db.get_summary().await?;

    println!("Clip store: {}", store.db_path.display());
    println!();
    println!("Clips:");
    println!("  Total:    {}", summary.total_clips);
    println!("  Unsorted: {}", summary.unsorted_clips);
    if let Some(newest) = &summary.newest_clip_created_at {
        println!("  Newest:   {newest}");
    }
    println!();
    println!(
        "Checkpoint: {}",
        checkpoint
            .read()
            .await?
            .unwrap_or_else(|| format!("none (starts at {})", sync::window::EPOCH_START))
    );

    if let Some(run) = &summary.last_run {
        println!();
        println!(
            "Last run:   #{} {} from {} at {}",
            run.id,
            run.mode.as_str(),
            run.window_start,
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        match (&run.completed_at, &run.stats.error) {
            (_, Some(error)) => println!("  Failed:   {error}"),
            (Some(_), None) => println!(
                "  Pages {}, seen {}, inserted {}, updated {}",
                run.stats.pages, run.stats.clips_seen, run.stats.inserted, run.stats.updated
            ),
            (None, None) => println!("  Still running or interrupted"),
        }
    }
    if let Some(run) = &summary.last_successful_run {
        if let Some(completed) = run.completed_at {
            println!(
                "Last success: {}",
                completed.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    if let Some(stats) = db.latest_daily_stats().await? {
        println!();
        println!("Daily stats ({}):", stats.date);
        println!("  Total:          {}", stats.total_clips);
        println!("  Unsorted:       {}", stats.unsorted_clips);
        println!("  Uncategorized:  {}", stats.uncategorized_clips);
        println!("  No subjects:    {}", stats.clips_without_subjects);
        println!("  No themes:      {}", stats.clips_without_themes);
        println!("  Views:          {}", stats.total_views);
        println!("  Broadcasters:   {}", stats.unique_broadcasters);
        println!("  Creators:       {}", stats.unique_creators);
    }

    Ok(())
}

async fn run_stats(args: StoreArgs) -> anyhow::Result<()> {
    let store = StoreConfig::from_args(&args);
    let _lock = InstanceLock::acquire(&store.db_path).await?;
    let (db, _) = open_store(&store).await?;
    let stats = db.record_daily_stats(Utc::now().date_naive()).await?;
    println!(
        "{}: {} clips ({} unsorted, {} uncategorized, {} without subjects, {} without themes), \
         {} views, {} broadcasters, {} creators",
        stats.date,
        stats.total_clips,
        stats.unsorted_clips,
        stats.uncategorized_clips,
        stats.clips_without_subjects,
        stats.clips_without_themes,
        stats.total_views,
        stats.unique_broadcasters,
        stats.unique_creators
    );
    Ok(())
}

async fn run_reset_checkpoint(args: cli::ResetCheckpointArgs) -> anyhow::Result<()> {
    let new_value = args.to.as_deref().map(config::parse_checkpoint).transpose()?;
    let store = StoreConfig::from_args(&args.store);
    let _lock = InstanceLock::acquire(&store.db_path).await?;
    let (_, checkpoint) = open_store(&store).await?;
    let current = checkpoint.read().await?;

    if !args.yes {
        println!(
            "Current checkpoint: {}",
            current.as_deref().unwrap_or("none")
        );
        match &new_value {
            Some(value) => println!("New checkpoint:     {value}"),
            None => println!(
                "New checkpoint:     none (next sync starts at {})",
                sync::window::EPOCH_START
            ),
        }
        print!("Continue? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    match new_value {
        Some(value) => {
            checkpoint.write(&value).await?;
            tracing::info!(from = current.as_deref().unwrap_or("none"), to = %value, "Checkpoint set");
            println!("Checkpoint set to {value}.");
        }
        None => {
            checkpoint.clear().await?;
            tracing::info!(from = current.as_deref().unwrap_or("none"), "Checkpoint cleared");
            println!("Checkpoint cleared.");
        }
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

    match cli.command {
        Command::Run(args) => run_daemon(args).await,
        Command::Sync(args) => run_sync(args).await,
        Command::Poll(args) => run_poll(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Stats(args) => run_stats(args).await,
        Command::ResetCheckpoint(args) => run_reset_checkpoint(args).await,
    }
}
