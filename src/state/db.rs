//! Clip store trait and SQLite implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{
    ClipRecord, ClipStatus, CommitStats, DailyStats, StoreSummary, SyncMode, SyncRunRecord,
    SyncRunStats,
};
use crate::checkpoint::{CheckpointError, CheckpointStore};

/// `sync_state` key holding the checkpoint.
const CHECKPOINT_KEY: &str = "checkpoint";

/// Trait for clip store operations.
///
/// Object-safe so it can be shared as `Arc<dyn ClipStore>` between the sync
/// engine and the scheduler jobs. Every clip store also holds a checkpoint
/// slot that [`ClipStore::commit_batch`] can write in the same transaction.
#[async_trait]
pub trait ClipStore: CheckpointStore {
    /// Look up a clip by its platform id.
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<ClipRecord>, StateError>;

    /// Return the subset of `ids` already present in the store.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StateError>;

    /// Write staged inserts and updates, plus the checkpoint if given, in a
    /// single transaction.
    ///
    /// Updates only touch platform fields. An insert whose id appeared in the
    /// meantime is folded into an update of the same fields.
    async fn commit_batch(
        &self,
        inserts: &[ClipRecord],
        updates: &[ClipRecord],
        checkpoint: Option<&str>,
    ) -> Result<CommitStats, StateError>;

    /// Open a run ledger entry and return its id.
    async fn start_sync_run(&self, mode: SyncMode, window_start: &str) -> Result<i64, StateError>;

    /// Close a run ledger entry.
    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError>;

    async fn get_summary(&self) -> Result<StoreSummary, StateError>;

    /// Compute and store the statistics snapshot for `date`, replacing any
    /// earlier snapshot for the same day.
    async fn record_daily_stats(&self, date: NaiveDate) -> Result<DailyStats, StateError>;

    async fn latest_daily_stats(&self) -> Result<Option<DailyStats>, StateError>;
}

/// SQLite implementation of the clip store.
pub struct SqliteClipStore {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteClipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteClipStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteClipStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StateError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        tracing::debug!(path = %path.display(), "Opened clip store");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run raw SQL against the store (for tests that stand in for the
    /// curation tooling).
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) {
        self.conn().unwrap().execute_batch(sql).unwrap();
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

const CLIP_COLUMNS: &str = "external_id, url, embed_url, broadcaster_id, broadcaster_name, creator_id, creator_name, video_id, game_id, language, title, view_count, created_at, thumbnail_url, duration, vod_offset, is_featured, status, category, themes, subjects, title_override, notes, first_seen_at, updated_at";

const RUN_COLUMNS: &str = "id, mode, window_start, started_at, completed_at, pages, clips_seen, inserted, updated, checkpoint_after, error";

const CHECKPOINT_UPSERT: &str = "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

#[async_trait]
impl ClipStore for SqliteClipStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ClipRecord>, StateError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {CLIP_COLUMNS} FROM clips WHERE external_id = ?1"),
            [external_id],
            |row| Ok(row_to_clip_record(row)),
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StateError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT 1 FROM clips WHERE external_id = ?1")
            .map_err(StateError::query)?;

        let mut found = HashSet::new();
        for id in ids {
            if stmt.exists([id]).map_err(StateError::query)? {
                found.insert(id.clone());
            }
        }
        Ok(found)
    }

    async fn commit_batch(
        &self,
        inserts: &[ClipRecord],
        updates: &[ClipRecord],
        checkpoint: Option<&str>,
    ) -> Result<CommitStats, StateError> {
        if inserts.is_empty() && updates.is_empty() && checkpoint.is_none() {
            return Ok(CommitStats::default());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        let mut stats = CommitStats::default();

        {
            let mut insert_stmt = tx
                .prepare_cached(&format!(
                    r#"
                    INSERT INTO clips ({CLIP_COLUMNS})
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
                    ON CONFLICT(external_id) DO UPDATE SET
                        url = excluded.url,
                        embed_url = excluded.embed_url,
                        broadcaster_id = excluded.broadcaster_id,
                        broadcaster_name = excluded.broadcaster_name,
                        creator_id = excluded.creator_id,
                        creator_name = excluded.creator_name,
                        title = excluded.title,
                        view_count = excluded.view_count,
                        created_at = excluded.created_at,
                        thumbnail_url = excluded.thumbnail_url,
                        duration = excluded.duration,
                        is_featured = excluded.is_featured,
                        updated_at = excluded.updated_at
                    "#
                ))
                .map_err(StateError::query)?;

            for record in inserts {
                let existed: bool = tx
                    .prepare_cached("SELECT 1 FROM clips WHERE external_id = ?1")
                    .and_then(|mut s| s.exists([&record.external_id]))
                    .map_err(StateError::query)?;

                insert_stmt
                    .execute(rusqlite::params![
                        record.external_id,
                        record.url,
                        record.embed_url,
                        record.broadcaster_id,
                        record.broadcaster_name,
                        record.creator_id,
                        record.creator_name,
                        record.video_id,
                        record.game_id,
                        record.language,
                        record.title,
                        record.view_count as i64,
                        record.created_at,
                        record.thumbnail_url,
                        record.duration,
                        record.vod_offset,
                        record.is_featured,
                        record.status.as_str(),
                        record.category,
                        encode_list(&record.themes),
                        encode_list(&record.subjects),
                        record.title_override,
                        record.notes,
                        record.first_seen_at.timestamp(),
                        record.updated_at.timestamp(),
                    ])
                    .map_err(StateError::query)?;

                if existed {
                    stats.updated += 1;
                } else {
                    stats.inserted += 1;
                }
            }

            let mut update_stmt = tx
                .prepare_cached(
                    r#"
                    UPDATE clips SET
                        url = ?2,
                        embed_url = ?3,
                        broadcaster_id = ?4,
                        broadcaster_name = ?5,
                        creator_id = ?6,
                        creator_name = ?7,
                        title = ?8,
                        view_count = ?9,
                        created_at = ?10,
                        thumbnail_url = ?11,
                        duration = ?12,
                        is_featured = ?13,
                        updated_at = ?14
                    WHERE external_id = ?1
                    "#,
                )
                .map_err(StateError::query)?;

            for record in updates {
                let rows = update_stmt
                    .execute(rusqlite::params![
                        record.external_id,
                        record.url,
                        record.embed_url,
                        record.broadcaster_id,
                        record.broadcaster_name,
                        record.creator_id,
                        record.creator_name,
                        record.title,
                        record.view_count as i64,
                        record.created_at,
                        record.thumbnail_url,
                        record.duration,
                        record.is_featured,
                        record.updated_at.timestamp(),
                    ])
                    .map_err(StateError::query)?;
                stats.updated += rows as u64;
            }
        }

        if let Some(value) = checkpoint {
            tx.execute(
                CHECKPOINT_UPSERT,
                rusqlite::params![CHECKPOINT_KEY, value, Utc::now().timestamp()],
            )
            .map_err(StateError::query)?;
        }

        tx.commit().map_err(StateError::query)?;
        if let Some(value) = checkpoint {
            tracing::debug!(checkpoint = value, "Checkpoint committed with batch");
        }
        Ok(stats)
    }

    async fn start_sync_run(&self, mode: SyncMode, window_start: &str) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO sync_runs (mode, window_start, started_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![mode.as_str(), window_start, started_at],
        )
        .map_err(StateError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.conn()?;

        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, pages = ?2, clips_seen = ?3, inserted = ?4, updated = ?5, checkpoint_after = ?6, error = ?7 WHERE id = ?8",
            rusqlite::params![
                completed_at,
                stats.pages,
                stats.clips_seen as i64,
                stats.inserted as i64,
                stats.updated as i64,
                stats.checkpoint_after,
                stats.error,
                run_id
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn get_summary(&self) -> Result<StoreSummary, StateError> {
        let conn = self.conn()?;

        let (total_clips, unsorted_clips, newest_clip_created_at): (i64, i64, Option<String>) =
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = 'unsorted'), 0), MAX(created_at) FROM clips",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(StateError::query)?;

        let last_run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY id DESC LIMIT 1"),
                [],
                row_to_sync_run,
            )
            .optional()
            .map_err(StateError::query)?;

        let last_successful_run = conn
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM sync_runs WHERE completed_at IS NOT NULL AND error IS NULL ORDER BY id DESC LIMIT 1"
                ),
                [],
                row_to_sync_run,
            )
            .optional()
            .map_err(StateError::query)?;

        Ok(StoreSummary {
            total_clips: total_clips as u64,
            unsorted_clips: unsorted_clips as u64,
            newest_clip_created_at,
            last_run,
            last_successful_run,
        })
    }

    async fn record_daily_stats(&self, date: NaiveDate) -> Result<DailyStats, StateError> {
        let conn = self.conn()?;

        let stats = conn
            .query_row(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(status = 'unsorted'), 0),
                    COALESCE(SUM(category IS NULL AND status != 'hidden'), 0),
                    COALESCE(SUM(subjects = '[]' AND status != 'hidden'), 0),
                    COALESCE(SUM(themes = '[]' AND status != 'hidden'), 0),
                    COALESCE(SUM(view_count), 0),
                    COUNT(DISTINCT broadcaster_id),
                    COUNT(DISTINCT creator_id)
                FROM clips
                "#,
                [],
                |row| Ok(daily_stats_from_counts(date, row_counts(row, 0)?)),
            )
            .map_err(StateError::query)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO daily_stats
                (date, total_clips, unsorted_clips, uncategorized_clips, clips_without_subjects, clips_without_themes, total_views, unique_broadcasters, unique_creators, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            rusqlite::params![
                date.format("%Y-%m-%d").to_string(),
                stats.total_clips as i64,
                stats.unsorted_clips as i64,
                stats.uncategorized_clips as i64,
                stats.clips_without_subjects as i64,
                stats.clips_without_themes as i64,
                stats.total_views as i64,
                stats.unique_broadcasters as i64,
                stats.unique_creators as i64,
                Utc::now().timestamp(),
            ],
        )
        .map_err(StateError::query)?;

        Ok(stats)
    }

    async fn latest_daily_stats(&self) -> Result<Option<DailyStats>, StateError> {
        let conn = self.conn()?;
        let row: Option<(String, [i64; DAILY_COUNTS])> = conn
            .query_row(
                "SELECT date, total_clips, unsorted_clips, uncategorized_clips, clips_without_subjects, clips_without_themes, total_views, unique_broadcasters, unique_creators FROM daily_stats ORDER BY date DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row_counts(row, 1)?)),
            )
            .optional()
            .map_err(StateError::query)?;

        let Some((date, counts)) = row else {
            return Ok(None);
        };
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| StateError::Query(format!("invalid stats date {date:?}: {e}")))?;

        Ok(Some(daily_stats_from_counts(date, counts)))
    }
}

#[async_trait]
impl CheckpointStore for SqliteClipStore {
    async fn read(&self) -> Result<Option<String>, CheckpointError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                [CHECKPOINT_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query)?;
        Ok(value)
    }

    async fn write(&self, value: &str) -> Result<(), CheckpointError> {
        let conn = self.conn()?;
        conn.execute(
            CHECKPOINT_UPSERT,
            rusqlite::params![CHECKPOINT_KEY, value, Utc::now().timestamp()],
        )
        .map_err(StateError::query)?;
        tracing::debug!(checkpoint = value, "Checkpoint written");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sync_state WHERE key = ?1", [CHECKPOINT_KEY])
            .map_err(StateError::query)?;
        Ok(())
    }
}

/// Number of counters in a `daily_stats` row.
const DAILY_COUNTS: usize = 8;

fn row_counts(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<[i64; DAILY_COUNTS]> {
    let mut counts = [0i64; DAILY_COUNTS];
    for (i, count) in counts.iter_mut().enumerate() {
        *count = row.get(offset + i)?;
    }
    Ok(counts)
}

fn daily_stats_from_counts(date: NaiveDate, counts: [i64; DAILY_COUNTS]) -> DailyStats {
    let [total, unsorted, uncategorized, no_subjects, no_themes, views, broadcasters, creators] =
        counts.map(|c| c.max(0) as u64);
    DailyStats {
        date,
        total_clips: total,
        unsorted_clips: unsorted,
        uncategorized_clips: uncategorized,
        clips_without_subjects: no_subjects,
        clips_without_themes: no_themes,
        total_views: views,
        unique_broadcasters: broadcasters,
        unique_creators: creators,
    }
}

fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

fn row_to_clip_record(row: &rusqlite::Row<'_>) -> ClipRecord {
    let status: String = row.get(17).unwrap_or_default();
    ClipRecord {
        external_id: row.get(0).unwrap_or_default(),
        url: row.get(1).unwrap_or_default(),
        embed_url: row.get(2).unwrap_or_default(),
        broadcaster_id: row.get(3).unwrap_or_default(),
        broadcaster_name: row.get(4).unwrap_or_default(),
        creator_id: row.get(5).unwrap_or_default(),
        creator_name: row.get(6).unwrap_or_default(),
        video_id: row.get(7).ok().flatten(),
        game_id: row.get(8).ok().flatten(),
        language: row.get(9).ok().flatten(),
        title: row.get(10).unwrap_or_default(),
        view_count: row.get::<_, i64>(11).unwrap_or(0) as u64,
        created_at: row.get(12).unwrap_or_default(),
        thumbnail_url: row.get(13).unwrap_or_default(),
        duration: row.get(14).unwrap_or(0.0),
        vod_offset: row.get(15).ok().flatten(),
        is_featured: row.get(16).unwrap_or(false),
        status: ClipStatus::from_str(&status).unwrap_or_default(),
        category: row.get(18).ok().flatten(),
        themes: decode_list(row.get(19).ok()),
        subjects: decode_list(row.get(20).ok()),
        title_override: row.get(21).ok().flatten(),
        notes: row.get(22).ok().flatten(),
        first_seen_at: timestamp(row.get(23).unwrap_or(0)),
        updated_at: timestamp(row.get(24).unwrap_or(0)),
    }
}

fn row_to_sync_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRunRecord> {
    let mode: String = row.get(1)?;
    Ok(SyncRunRecord {
        id: row.get(0)?,
        mode: SyncMode::from_str(&mode).unwrap_or(SyncMode::Checkpointed),
        window_start: row.get(2)?,
        started_at: timestamp(row.get(3)?),
        completed_at: row.get::<_, Option<i64>>(4)?.map(timestamp),
        stats: SyncRunStats {
            pages: row.get(5)?,
            clips_seen: row.get::<_, i64>(6)? as u64,
            inserted: row.get::<_, i64>(7)? as u64,
            updated: row.get::<_, i64>(8)? as u64,
            checkpoint_after: row.get(9)?,
            error: row.get(10)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::dto;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn record(id: &str) -> ClipRecord {
        ClipRecord::new_unsorted(&dto(id, "2024-01-01T00:00:00Z"), now())
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("clips.db");
        let store = SqliteClipStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn test_find_missing_clip() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        assert!(store.find_by_external_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        let stats = store
            .commit_batch(&[record("A"), record("B")], &[], None)
            .await
            .unwrap();
        assert_eq!(
            stats,
            CommitStats {
                inserted: 2,
                updated: 0
            }
        );

        let found = store.find_by_external_id("A").await.unwrap().unwrap();
        assert_eq!(found, record("A"));
        assert_eq!(found.status, ClipStatus::Unsorted);
    }

    #[tokio::test]
    async fn test_existing_ids() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        store.commit_batch(&[record("A")], &[], None).await.unwrap();
        let ids = vec!["A".to_string(), "B".to_string()];
        let found = store.existing_ids(&ids).await.unwrap();
        assert_eq!(found, HashSet::from(["A".to_string()]));
        assert!(store.existing_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_preserves_curation_fields() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        store.commit_batch(&[record("A")], &[], None).await.unwrap();

        {
            let conn = store.conn().unwrap();
            conn.execute(
                "UPDATE clips SET status = 'visible', category = 'Ambassadors', themes = '[\"Funny\"]', notes = 'keep' WHERE external_id = 'A'",
                [],
            )
            .unwrap();
        }

        let mut changed = record("A");
        changed.view_count = 999;
        changed.title = "renamed".into();
        let stats = store.commit_batch(&[], &[changed], None).await.unwrap();
        assert_eq!(stats.updated, 1);

        let found = store.find_by_external_id("A").await.unwrap().unwrap();
        assert_eq!(found.view_count, 999);
        assert_eq!(found.title, "renamed");
        assert_eq!(found.status, ClipStatus::Visible);
        assert_eq!(found.category.as_deref(), Some("Ambassadors"));
        assert_eq!(found.themes, vec!["Funny".to_string()]);
        assert_eq!(found.notes.as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn test_insert_conflict_becomes_update() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        store.commit_batch(&[record("A")], &[], None).await.unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute("UPDATE clips SET status = 'hidden' WHERE external_id = 'A'", [])
                .unwrap();
        }

        let mut again = record("A");
        again.view_count = 40;
        let stats = store.commit_batch(&[again], &[], None).await.unwrap();
        assert_eq!(
            stats,
            CommitStats {
                inserted: 0,
                updated: 1
            }
        );

        let found = store.find_by_external_id("A").await.unwrap().unwrap();
        assert_eq!(found.view_count, 40);
        assert_eq!(found.status, ClipStatus::Hidden);
        let count: i64 = store
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM clips", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_commit_batch_is_atomic() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON clips WHEN NEW.external_id = 'BAD' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        }

        let result = store.commit_batch(&[record("A"), record("BAD")], &[], None).await;
        assert!(result.is_err());
        assert!(store.find_by_external_id("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_empty_batch() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        let stats = store.commit_batch(&[], &[], None).await.unwrap();
        assert_eq!(stats, CommitStats::default());
    }

    #[tokio::test]
    async fn test_commit_batch_writes_checkpoint() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        store
            .commit_batch(&[record("A")], &[], Some("2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            store.read().await.unwrap().as_deref(),
            Some("2024-01-01T00:00:00Z")
        );

        // A checkpoint-only commit still lands.
        store
            .commit_batch(&[], &[], Some("2024-01-07T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            store.read().await.unwrap().as_deref(),
            Some("2024-01-07T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_rejected_checkpoint_rolls_back_clips() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        store.execute_batch(
            "CREATE TRIGGER reject_checkpoint BEFORE INSERT ON sync_state BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        );

        let result = store
            .commit_batch(&[record("A")], &[], Some("2024-01-01T00:00:00Z"))
            .await;

        assert!(result.is_err());
        assert!(store.find_by_external_id("A").await.unwrap().is_none());
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_run_lifecycle() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        let id = store
            .start_sync_run(SyncMode::Checkpointed, "2021-07-21T00:00:00Z")
            .await
            .unwrap();

        let running = store.get_summary().await.unwrap();
        let last = running.last_run.unwrap();
        assert_eq!(last.id, id);
        assert!(last.completed_at.is_none());
        assert!(running.last_successful_run.is_none());

        let stats = SyncRunStats {
            pages: 3,
            clips_seen: 250,
            inserted: 240,
            updated: 10,
            checkpoint_after: Some("2024-01-02T00:00:00Z".into()),
            error: None,
        };
        store.complete_sync_run(id, &stats).await.unwrap();

        let failed = store
            .start_sync_run(SyncMode::FastPoll, "2024-01-04T12:00:00Z")
            .await
            .unwrap();
        store
            .complete_sync_run(
                failed,
                &SyncRunStats {
                    error: Some("boom".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let summary = store.get_summary().await.unwrap();
        let last = summary.last_run.unwrap();
        assert_eq!(last.mode, SyncMode::FastPoll);
        assert_eq!(last.stats.error.as_deref(), Some("boom"));
        let ok = summary.last_successful_run.unwrap();
        assert_eq!(ok.id, id);
        assert_eq!(ok.stats.pages, 3);
        assert_eq!(ok.stats.inserted, 240);
        assert_eq!(
            ok.stats.checkpoint_after.as_deref(),
            Some("2024-01-02T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        let mut newer = record("B");
        newer.created_at = "2024-01-05T00:00:00Z".into();
        store
            .commit_batch(&[record("A"), newer], &[], None)
            .await
            .unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute("UPDATE clips SET status = 'visible' WHERE external_id = 'A'", [])
                .unwrap();
        }

        let summary = store.get_summary().await.unwrap();
        assert_eq!(summary.total_clips, 2);
        assert_eq!(summary.unsorted_clips, 1);
        assert_eq!(
            summary.newest_clip_created_at.as_deref(),
            Some("2024-01-05T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_daily_stats() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        assert!(store.latest_daily_stats().await.unwrap().is_none());

        let mut other = record("B");
        other.creator_id = "2002".into();
        other.view_count = 8;
        let hidden = record("C");
        store
            .commit_batch(&[record("A"), other, hidden], &[], None)
            .await
            .unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute_batch(
                "UPDATE clips SET status = 'visible', category = 'Ambassadors', subjects = '[\"Georgie\"]' WHERE external_id = 'A';
                 UPDATE clips SET themes = '[\"Funny\"]' WHERE external_id = 'B';
                 UPDATE clips SET status = 'hidden' WHERE external_id = 'C';",
            )
            .unwrap();
        }

        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let stats = store.record_daily_stats(day).await.unwrap();
        assert_eq!(
            stats,
            DailyStats {
                date: day,
                total_clips: 3,
                unsorted_clips: 1,
                uncategorized_clips: 1,
                clips_without_subjects: 1,
                clips_without_themes: 1,
                total_views: 32,
                unique_broadcasters: 1,
                unique_creators: 2,
            }
        );

        // Re-recording the same day replaces the row.
        store.record_daily_stats(day).await.unwrap();
        let next = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
        store.record_daily_stats(next).await.unwrap();
        let latest = store.latest_daily_stats().await.unwrap().unwrap();
        assert_eq!(latest.date, next);
        assert_eq!(latest.clips_without_subjects, 1);
        assert_eq!(latest.clips_without_themes, 1);
        let rows: i64 = store
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM daily_stats", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn test_checkpoint_key() {
        let store = SqliteClipStore::open_in_memory().unwrap();
        assert_eq!(store.read().await.unwrap(), None);
        store.write("2024-01-02T00:00:00Z").await.unwrap();
        store.write("2024-01-08T00:00:00Z").await.unwrap();
        assert_eq!(
            store.read().await.unwrap().as_deref(),
            Some("2024-01-08T00:00:00Z")
        );
        store.clear().await.unwrap();
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clips.db");
        {
            let store = SqliteClipStore::open(&path).await.unwrap();
            store.commit_batch(&[record("A")], &[], None).await.unwrap();
            store.write("2024-01-02T00:00:00Z").await.unwrap();
        }
        let store = SqliteClipStore::open(&path).await.unwrap();
        assert!(store.find_by_external_id("A").await.unwrap().is_some());
        assert_eq!(
            store.read().await.unwrap().as_deref(),
            Some("2024-01-02T00:00:00Z")
        );
    }
}
