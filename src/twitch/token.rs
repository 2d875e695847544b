//! App access token cache for the client-credentials grant.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};

/// Tokens are treated as expired this long before Twitch says they are.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Cap on the advertised lifetime; Helix app tokens last about 60 days.
const MAX_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Clone)]
pub(crate) struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    pub fn new(access_token: String, expires_in_secs: u64, now: DateTime<Utc>) -> Self {
        let lifetime = Duration::seconds(expires_in_secs.min(MAX_LIFETIME_SECS) as i64);
        Self {
            access_token,
            expires_at: now + lifetime,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Holds at most one app token.
///
/// Callers lock the slot for the duration of a refresh so concurrent page
/// fetches never issue more than one token request.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub async fn lock(&self) -> MutexGuard<'_, Option<CachedToken>> {
        self.slot.lock().await
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
