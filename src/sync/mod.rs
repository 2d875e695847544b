//! Clip sync engine: incremental, checkpointed ingestion of one
//! broadcaster's clips into the clip store.
//!
//! Each invocation pages through `GET /clips` from a window start, stages
//! inserts and platform-field updates in memory and commits them in one
//! transaction together with the reconciled checkpoint. A failed
//! invocation therefore leaves both records and checkpoint untouched and the
//! next tick resumes from the last persisted value.

pub mod error;
pub mod window;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::checkpoint::CheckpointStore;
use crate::state::{ClipRecord, ClipStore, DailyStats, SyncMode, SyncRunStats};
use crate::twitch::{ApiError, ClipQuery, ClipsApi};

pub use error::SyncError;
use window::{format_timestamp, parse_timestamp, reconcile, whole_seconds};

/// Source of the current time. Injected so tests can pin "now".
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Largest page size Helix accepts.
pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub broadcaster_id: String,
    pub page_size: u32,
    /// Window start when no checkpoint exists.
    pub epoch_start: String,
    pub stall_advance: Duration,
    /// Trailing window rescanned by the fast poll.
    pub fast_poll_window: Duration,
}

impl SyncSettings {
    pub fn new(broadcaster_id: impl Into<String>) -> Self {
        Self {
            broadcaster_id: broadcaster_id.into(),
            page_size: PAGE_SIZE,
            epoch_start: window::EPOCH_START.to_string(),
            stall_advance: Duration::days(window::STALL_ADVANCE_DAYS),
            fast_poll_window: Duration::days(window::STALL_ADVANCE_DAYS),
        }
    }
}

/// What one successful invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub window_start: String,
    pub pages: u32,
    pub clips_seen: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Checkpoint as persisted before the run.
    pub checkpoint_before: Option<String>,
    /// Last reconciled value, whether or not it was persisted.
    pub reconciled_checkpoint: Option<String>,
    /// Value written to the checkpoint store, if any.
    pub checkpoint_written: Option<String>,
}

/// Staged writes for one invocation, keyed by external id.
#[derive(Default)]
struct Staging {
    inserts: Vec<ClipRecord>,
    insert_index: HashMap<String, usize>,
    updates: Vec<ClipRecord>,
    update_index: HashMap<String, usize>,
}

impl Staging {
    fn is_staged(&self, id: &str) -> bool {
        self.insert_index.contains_key(id) || self.update_index.contains_key(id)
    }

    fn staged_mut(&mut self, id: &str) -> Option<&mut ClipRecord> {
        if let Some(&i) = self.insert_index.get(id) {
            return self.inserts.get_mut(i);
        }
        if let Some(&i) = self.update_index.get(id) {
            return self.updates.get_mut(i);
        }
        None
    }

    fn stage_insert(&mut self, record: ClipRecord) {
        self.insert_index
            .insert(record.external_id.clone(), self.inserts.len());
        self.inserts.push(record);
    }

    fn stage_update(&mut self, record: ClipRecord) {
        self.update_index
            .insert(record.external_id.clone(), self.updates.len());
        self.updates.push(record);
    }
}

/// Where the engine persists its checkpoint.
pub enum CheckpointTarget {
    /// The clip store's own slot, committed in the same transaction as the
    /// staged clips.
    Store,
    /// A separate store, written once the clips have committed.
    External(Arc<dyn CheckpointStore>),
}

struct PageLoopOutcome {
    pages: u32,
    clips_seen: u64,
    staging: Staging,
    reconciled: Option<DateTime<Utc>>,
}

pub struct SyncEngine {
    api: Arc<dyn ClipsApi>,
    store: Arc<dyn ClipStore>,
    checkpoint: CheckpointTarget,
    settings: SyncSettings,
    clock: Clock,
    /// Single-flight guard.
    running: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn ClipsApi>,
        store: Arc<dyn ClipStore>,
        checkpoint: CheckpointTarget,
        settings: SyncSettings,
    ) -> Self {
        Self {
            api,
            store,
            checkpoint,
            settings,
            clock: Arc::new(Utc::now),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        whole_seconds((self.clock)())
    }

    async fn read_checkpoint(&self) -> Result<Option<String>, SyncError> {
        let value = match &self.checkpoint {
            CheckpointTarget::Store => self.store.read().await?,
            CheckpointTarget::External(target) => target.read().await?,
        };
        Ok(value)
    }

    /// Rescan the trailing window without touching the checkpoint.
    pub async fn fast_poll(&self) -> Result<SyncReport, SyncError> {
        let start = self.now() - self.settings.fast_poll_window;
        self.sync(Some(start), false).await
    }

    /// Run one sync invocation.
    ///
    /// `window_start` overrides the persisted checkpoint as the lower bound
    /// of the query. With `persist_checkpoint` false the reconciled
    /// checkpoint is computed and logged but never written.
    pub async fn sync(
        &self,
        window_start: Option<DateTime<Utc>>,
        persist_checkpoint: bool,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;

        let mode = if persist_checkpoint {
            SyncMode::Checkpointed
        } else {
            SyncMode::FastPoll
        };

        let stored = self.read_checkpoint().await?;
        let effective = match window_start {
            Some(ts) => format_timestamp(whole_seconds(ts)),
            None => stored
                .clone()
                .unwrap_or_else(|| self.settings.epoch_start.clone()),
        };

        let run_id = self.store.start_sync_run(mode, &effective).await?;
        tracing::info!(
            run_id,
            mode = mode.as_str(),
            window_start = %effective,
            checkpoint = stored.as_deref().unwrap_or("none"),
            "Starting clip sync"
        );

        let result = self
            .run(mode, &effective, stored.as_deref(), persist_checkpoint)
            .await;

        let ledger = match &result {
            Ok(report) => SyncRunStats {
                pages: report.pages,
                clips_seen: report.clips_seen,
                inserted: report.inserted,
                updated: report.updated,
                checkpoint_after: report.checkpoint_written.clone(),
                error: None,
            },
            Err(e) => SyncRunStats {
                error: Some(e.to_string()),
                ..Default::default()
            },
        };
        if let Err(e) = self.store.complete_sync_run(run_id, &ledger).await {
            tracing::warn!(run_id, error = %e, "Failed to record sync run");
        }

        match result {
            Ok(report) => {
                tracing::info!(
                    run_id,
                    mode = mode.as_str(),
                    pages = report.pages,
                    clips_seen = report.clips_seen,
                    inserted = report.inserted,
                    updated = report.updated,
                    checkpoint = report.checkpoint_written.as_deref().unwrap_or("unchanged"),
                    "Clip sync complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(run_id, mode = mode.as_str(), error = %e, "Clip sync failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        mode: SyncMode,
        effective: &str,
        stored: Option<&str>,
        persist_checkpoint: bool,
    ) -> Result<SyncReport, SyncError> {
        let outcome = self
            .page_loop(effective, stored, persist_checkpoint)
            .await?;

        let staging = outcome.staging;
        let reconciled = outcome.reconciled.map(format_timestamp);
        let to_persist = reconciled.as_deref().filter(|_| persist_checkpoint);

        let commit = match &self.checkpoint {
            CheckpointTarget::Store => {
                self.store
                    .commit_batch(&staging.inserts, &staging.updates, to_persist)
                    .await?
            }
            CheckpointTarget::External(target) => {
                let commit = self
                    .store
                    .commit_batch(&staging.inserts, &staging.updates, None)
                    .await?;
                if let Some(value) = to_persist {
                    target.write(value).await?;
                }
                commit
            }
        };
        let written = to_persist.map(str::to_string);

        Ok(SyncReport {
            mode,
            window_start: effective.to_string(),
            pages: outcome.pages,
            clips_seen: outcome.clips_seen,
            inserted: commit.inserted,
            updated: commit.updated,
            checkpoint_before: stored.map(str::to_string),
            reconciled_checkpoint: reconciled,
            checkpoint_written: written,
        })
    }

    async fn page_loop(
        &self,
        effective: &str,
        stored: Option<&str>,
        persist_checkpoint: bool,
    ) -> Result<PageLoopOutcome, SyncError> {
        let base_previous = match stored.map(parse_timestamp) {
            Some(Ok(ts)) => ts,
            Some(Err(e)) if persist_checkpoint => return Err(e),
            Some(Err(e)) => {
                // Never written by this mode, so only the window start matters.
                tracing::warn!(error = %e, "Ignoring unreadable checkpoint");
                parse_timestamp(effective)?
            }
            None => parse_timestamp(effective)?,
        };
        let mut staging = Staging::default();
        let mut seen_cursors: HashSet<String> = HashSet::new();
        let mut reconciled: Option<DateTime<Utc>> = None;
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;
        let mut clips_seen = 0u64;

        loop {
            let query = ClipQuery {
                broadcaster_id: &self.settings.broadcaster_id,
                first: self.settings.page_size,
                started_at: effective,
                after: cursor.as_deref(),
            };
            let page = self.api.list_clips(&query).await?;
            pages += 1;
            clips_seen += page.clips.len() as u64;

            let fresh: Vec<String> = page
                .clips
                .iter()
                .filter(|c| !staging.is_staged(&c.id))
                .map(|c| c.id.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            let existing = self.store.existing_ids(&fresh).await?;

            let now = self.now();
            let mut latest: Option<DateTime<Utc>> = None;
            for clip in &page.clips {
                let created = parse_timestamp(&clip.created_at)?;
                latest = Some(latest.map_or(created, |l| l.max(created)));

                if let Some(record) = staging.staged_mut(&clip.id) {
                    record.apply_platform_fields(clip, now);
                } else if existing.contains(&clip.id) {
                    let Some(mut record) = self.store.find_by_external_id(&clip.id).await? else {
                        // Removed between the lookups; treat as new.
                        staging.stage_insert(ClipRecord::new_unsorted(clip, now));
                        continue;
                    };
                    record.apply_platform_fields(clip, now);
                    staging.stage_update(record);
                } else {
                    staging.stage_insert(ClipRecord::new_unsorted(clip, now));
                }
            }

            let previous = if persist_checkpoint {
                reconciled.unwrap_or(base_previous)
            } else {
                base_previous
            };
            let next = reconcile(previous, latest, now, self.settings.stall_advance);
            let latest_str = latest.map(format_timestamp);
            let next_str = next.map(format_timestamp);
            tracing::debug!(
                page = pages,
                clips = page.clips.len(),
                latest = latest_str.as_deref().unwrap_or("none"),
                previous = %format_timestamp(previous),
                next = next_str.as_deref().unwrap_or("unchanged"),
                "Reconciled checkpoint"
            );
            if let Some(next) = next {
                reconciled = Some(reconciled.map_or(next, |r| r.max(next)));
            }

            match page.cursor {
                Some(next_cursor) => {
                    if !seen_cursors.insert(next_cursor.clone()) {
                        return Err(ApiError::MalformedResponse(format!(
                            "pagination cursor {next_cursor:?} repeated on page {pages}"
                        ))
                        .into());
                    }
                    cursor = Some(next_cursor);
                }
                None => break,
            }
        }

        Ok(PageLoopOutcome {
            pages,
            clips_seen,
            staging,
            reconciled,
        })
    }

    /// Record today's statistics snapshot.
    pub async fn record_daily_stats(&self) -> Result<DailyStats, SyncError> {
        let today: NaiveDate = self.now().date_naive();
        let stats = self.store.record_daily_stats(today).await?;
        tracing::info!(
            date = %stats.date,
            total = stats.total_clips,
            unsorted = stats.unsorted_clips,
            uncategorized = stats.uncategorized_clips,
            without_subjects = stats.clips_without_subjects,
            without_themes = stats.clips_without_themes,
            views = stats.total_views,
            broadcasters = stats.unique_broadcasters,
            creators = stats.unique_creators,
            "Recorded daily clip statistics"
        );
        Ok(stats)
    }
}
