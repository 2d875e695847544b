//! Periodic jobs for the daemon.
//!
//! Each job runs on its own interval with [`MissedTickBehavior::Skip`]: a
//! tick that fires late runs once and missed ticks are not stacked. All jobs
//! share one [`SyncEngine`], so a tick that lands while another sync is in
//! flight is skipped by the engine's single-flight guard. The fast poll is
//! started half a period late so its ticks fall between checkpointed ones.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::sync::SyncEngine;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_FAST_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub sync_interval: Duration,
    pub fast_poll_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            fast_poll_interval: DEFAULT_FAST_POLL_INTERVAL,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Checkpointed,
    FastPoll,
    DailyStats,
}

impl Job {
    fn name(self) -> &'static str {
        match self {
            Job::Checkpointed => "sync",
            Job::FastPoll => "fast-poll",
            Job::DailyStats => "daily-stats",
        }
    }

    /// Delay before the first tick.
    fn start_offset(self, period: Duration) -> Duration {
        match self {
            Job::FastPoll => period / 2,
            Job::Checkpointed | Job::DailyStats => Duration::ZERO,
        }
    }

    async fn run_once(self, engine: &SyncEngine) {
        let result = match self {
            Job::Checkpointed => engine.sync(None, true).await.map(|_| ()),
            Job::FastPoll => engine.fast_poll().await.map(|_| ()),
            Job::DailyStats => engine.record_daily_stats().await.map(|_| ()),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_skip() => {
                tracing::info!(job = self.name(), "Previous sync still running, skipping tick");
            }
            // The engine has already logged the failure; the next tick retries.
            Err(e) => tracing::debug!(job = self.name(), error = %e, "Job failed"),
        }
    }
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, config: ScheduleConfig) -> Self {
        Self { engine, config }
    }

    /// Run all jobs until `shutdown` is cancelled. An in-flight job finishes
    /// before this returns.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            sync_secs = self.config.sync_interval.as_secs(),
            fast_poll_secs = self.config.fast_poll_interval.as_secs(),
            stats_secs = self.config.stats_interval.as_secs(),
            "Scheduler started"
        );

        let mut jobs = JoinSet::new();
        for (job, period) in [
            (Job::Checkpointed, self.config.sync_interval),
            (Job::FastPoll, self.config.fast_poll_interval),
            (Job::DailyStats, self.config.stats_interval),
        ] {
            jobs.spawn(job_loop(job, period, self.engine.clone(), shutdown.clone()));
        }

        while let Some(res) = jobs.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Scheduler job panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn job_loop(
    job: Job,
    period: Duration,
    engine: Arc<SyncEngine>,
    shutdown: CancellationToken,
) {
    let mut timer = interval_at(Instant::now() + job.start_offset(period), period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = timer.tick() => {}
        }
        tracing::debug!(job = job.name(), "Tick");
        job.run_once(&engine).await;
    }
}
