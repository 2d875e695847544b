//! Fixtures shared by unit tests across modules.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::twitch::{ApiError, ClipDto, ClipQuery, ClipsApi, ClipsPage};

/// A clip as Helix would return it for the sanctuary channel.
pub(crate) fn dto(id: &str, created_at: &str) -> ClipDto {
    ClipDto {
        id: id.to_string(),
        url: format!("https://clips.twitch.tv/{id}"),
        embed_url: format!("https://clips.twitch.tv/embed?clip={id}"),
        broadcaster_id: "636587384".to_string(),
        broadcaster_name: "AlveusSanctuary".to_string(),
        creator_id: "1001".to_string(),
        creator_name: "clipper".to_string(),
        video_id: String::new(),
        game_id: "509658".to_string(),
        language: "en".to_string(),
        title: "otter zoomies".to_string(),
        view_count: 12,
        created_at: created_at.to_string(),
        thumbnail_url: "https://clips-media-assets2.twitch.tv/t.jpg".to_string(),
        duration: 27.5,
        vod_offset: Some(3600),
        is_featured: false,
    }
}

pub(crate) fn page(clips: Vec<ClipDto>, cursor: Option<&str>) -> ClipsPage {
    ClipsPage {
        clips,
        cursor: cursor.map(str::to_string),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedQuery {
    pub broadcaster_id: String,
    pub first: u32,
    pub started_at: String,
    pub after: Option<String>,
}

/// Scripted [`ClipsApi`]: hands out the queued responses in order, then
/// empty pages.
pub(crate) struct FakeApi {
    responses: Mutex<VecDeque<Result<ClipsPage, ApiError>>>,
    queries: Mutex<Vec<RecordedQuery>>,
    gate: Option<Semaphore>,
    arrived: Notify,
}

impl FakeApi {
    pub fn new(responses: Vec<Result<ClipsPage, ApiError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            queries: Mutex::new(Vec::new()),
            gate: None,
            arrived: Notify::new(),
        }
    }

    /// Block every request until [`FakeApi::release`] is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub async fn wait_for_request(&self) {
        self.arrived.notified().await;
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClipsApi for FakeApi {
    async fn list_clips(&self, query: &ClipQuery<'_>) -> Result<ClipsPage, ApiError> {
        self.queries.lock().unwrap().push(RecordedQuery {
            broadcaster_id: query.broadcaster_id.to_string(),
            first: query.first,
            started_at: query.started_at.to_string(),
            after: query.after.map(str::to_string),
        });
        self.arrived.notify_one();

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ClipsPage::default()))
    }
}
