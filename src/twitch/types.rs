//! Wire types for the Helix clips endpoint and the OAuth token endpoint.

use serde::Deserialize;

/// One clip as returned by `GET /clips`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClipDto {
    pub id: String,
    pub url: String,
    pub embed_url: String,
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub creator_id: String,
    pub creator_name: String,
    #[serde(default)]
    pub video_id: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub language: String,
    pub title: String,
    pub view_count: u64,
    /// RFC 3339 UTC, second precision (`2024-01-02T00:00:00Z`).
    pub created_at: String,
    pub thumbnail_url: String,
    /// Seconds; Helix reports fractional durations such as `29.9`.
    pub duration: f64,
    #[serde(default)]
    pub vod_offset: Option<i64>,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClipsResponse {
    pub data: Vec<ClipDto>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// Parameters for a single page request.
#[derive(Debug, Clone, Copy)]
pub struct ClipQuery<'a> {
    pub broadcaster_id: &'a str,
    pub first: u32,
    pub started_at: &'a str,
    pub after: Option<&'a str>,
}

/// One page of clips plus the continuation cursor, if any.
#[derive(Debug, Clone, Default)]
pub struct ClipsPage {
    pub clips: Vec<ClipDto>,
    pub cursor: Option<String>,
}

impl From<ClipsResponse> for ClipsPage {
    fn from(resp: ClipsResponse) -> Self {
        // Helix sends `"pagination": {}` or an empty cursor on the last page.
        let cursor = resp.pagination.cursor.filter(|c| !c.is_empty());
        Self {
            clips: resp.data,
            cursor,
        }
    }
}
