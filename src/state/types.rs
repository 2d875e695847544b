//! Types for the clip store.

use chrono::{DateTime, NaiveDate, Utc};

use crate::twitch::ClipDto;

/// Moderation status of a clip.
///
/// Only the surrounding curation tooling changes this; the sync assigns
/// `Unsorted` to new clips and never touches it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipStatus {
    #[default]
    Unsorted,
    Visible,
    Pending,
    Hidden,
}

impl ClipStatus {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsorted => "unsorted",
            Self::Visible => "visible",
            Self::Pending => "pending",
            Self::Hidden => "hidden",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unsorted" => Some(Self::Unsorted),
            "visible" => Some(Self::Visible),
            "pending" => Some(Self::Pending),
            "hidden" => Some(Self::Hidden),
            _ => None,
        }
    }
}

/// Which flavour of sync produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Resumes from and advances the persisted checkpoint.
    Checkpointed,
    /// Rescans a trailing window and leaves the checkpoint alone.
    FastPoll,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpointed => "checkpointed",
            Self::FastPoll => "fast-poll",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "checkpointed" => Some(Self::Checkpointed),
            "fast-poll" => Some(Self::FastPoll),
            _ => None,
        }
    }
}

/// A clip as stored locally: platform metadata plus curation fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRecord {
    /// Platform clip id (slug). Unique across the store.
    pub external_id: String,
    pub url: String,
    pub embed_url: String,
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub creator_id: String,
    pub creator_name: String,
    pub video_id: Option<String>,
    pub game_id: Option<String>,
    pub language: Option<String>,
    pub title: String,
    pub view_count: u64,
    /// Platform creation timestamp, kept verbatim.
    pub created_at: String,
    pub thumbnail_url: String,
    pub duration: f64,
    pub vod_offset: Option<i64>,
    pub is_featured: bool,

    // Curation
    pub status: ClipStatus,
    pub category: Option<String>,
    pub themes: Vec<String>,
    pub subjects: Vec<String>,
    pub title_override: Option<String>,
    pub notes: Option<String>,

    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl ClipRecord {
    /// Build a fresh, uncurated record from an API clip.
    pub fn new_unsorted(clip: &ClipDto, now: DateTime<Utc>) -> Self {
        Self {
            external_id: clip.id.clone(),
            url: clip.url.clone(),
            embed_url: clip.embed_url.clone(),
            broadcaster_id: clip.broadcaster_id.clone(),
            broadcaster_name: clip.broadcaster_name.clone(),
            creator_id: clip.creator_id.clone(),
            creator_name: clip.creator_name.clone(),
            video_id: non_empty(&clip.video_id),
            game_id: non_empty(&clip.game_id),
            language: non_empty(&clip.language),
            title: clip.title.clone(),
            view_count: clip.view_count,
            created_at: clip.created_at.clone(),
            thumbnail_url: clip.thumbnail_url.clone(),
            duration: clip.duration,
            vod_offset: clip.vod_offset,
            is_featured: clip.is_featured,
            status: ClipStatus::Unsorted,
            category: None,
            themes: Vec::new(),
            subjects: Vec::new(),
            title_override: None,
            notes: None,
            first_seen_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the fields the platform may change after creation.
    ///
    /// Curation fields, `video_id`, `game_id`, `language` and `vod_offset`
    /// are left as they are.
    pub fn apply_platform_fields(&mut self, clip: &ClipDto, now: DateTime<Utc>) {
        self.url.clone_from(&clip.url);
        self.embed_url.clone_from(&clip.embed_url);
        self.broadcaster_id.clone_from(&clip.broadcaster_id);
        self.broadcaster_name.clone_from(&clip.broadcaster_name);
        self.creator_id.clone_from(&clip.creator_id);
        self.creator_name.clone_from(&clip.creator_name);
        self.title.clone_from(&clip.title);
        self.view_count = clip.view_count;
        self.created_at.clone_from(&clip.created_at);
        self.thumbnail_url.clone_from(&clip.thumbnail_url);
        self.duration = clip.duration;
        self.is_featured = clip.is_featured;
        self.updated_at = now;
    }
}

/// Rows touched by one batch commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub inserted: u64,
    pub updated: u64,
}

/// Outcome of a sync run as written to the run ledger.
#[derive(Debug, Clone, Default)]
pub struct SyncRunStats {
    pub pages: u32,
    pub clips_seen: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Checkpoint persisted by this run, if it moved.
    pub checkpoint_after: Option<String>,
    /// Set when the run aborted.
    pub error: Option<String>,
}

/// One row of the run ledger.
#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub id: i64,
    pub mode: SyncMode,
    pub window_start: String,
    pub started_at: DateTime<Utc>,
    /// `None` while running, or if the process died mid-run.
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: SyncRunStats,
}

/// Snapshot of clip counts for one UTC day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_clips: u64,
    pub unsorted_clips: u64,
    /// Non-hidden clips with no category assigned.
    pub uncategorized_clips: u64,
    /// Non-hidden clips with an empty subject list.
    pub clips_without_subjects: u64,
    /// Non-hidden clips with an empty theme list.
    pub clips_without_themes: u64,
    pub total_views: u64,
    pub unique_broadcasters: u64,
    pub unique_creators: u64,
}

/// Summary of the store for the `status` command.
#[derive(Debug, Clone)]
pub struct StoreSummary {
    pub total_clips: u64,
    pub unsorted_clips: u64,
    pub newest_clip_created_at: Option<String>,
    pub last_run: Option<SyncRunRecord>,
    pub last_successful_run: Option<SyncRunRecord>,
}
