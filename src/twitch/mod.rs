//! Twitch Helix clips API.
//!
//! The sync engine only sees the [`ClipsApi`] trait; [`HelixClient`] is the
//! production implementation that handles the app access token and retries.

pub mod client;
pub mod error;
mod token;
pub mod types;

use async_trait::async_trait;

pub use client::{HelixClient, HelixSettings};
pub use error::ApiError;
pub use types::{ClipDto, ClipQuery, ClipsPage};

/// Source of clip pages for one broadcaster.
#[async_trait]
pub trait ClipsApi: Send + Sync {
    /// Fetch one page of clips created at or after `query.started_at`.
    async fn list_clips(&self, query: &ClipQuery<'_>) -> Result<ClipsPage, ApiError>;
}
