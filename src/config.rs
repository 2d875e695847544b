use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use crate::cli::{StoreArgs, TwitchArgs};
use crate::retry::RetryConfig;
use crate::sync::window::{format_timestamp, parse_timestamp};
use crate::sync::SyncSettings;
use crate::twitch::HelixSettings;

/// Resolved storage locations.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub checkpoint_file: Option<PathBuf>,
}

impl StoreConfig {
    pub fn from_args(args: &StoreArgs) -> Self {
        Self {
            db_path: expand_tilde(&args.db),
            checkpoint_file: args.checkpoint_file.as_deref().map(expand_tilde),
        }
    }
}

/// Everything needed to build a sync engine.
///
/// `Debug` comes from [`HelixSettings`], which redacts the client secret.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub helix: HelixSettings,
    pub sync: SyncSettings,
}

impl Config {
    pub fn from_args(store: &StoreArgs, twitch: TwitchArgs) -> anyhow::Result<Self> {
        if twitch.client_id.trim().is_empty() || twitch.client_secret.trim().is_empty() {
            anyhow::bail!("Twitch client id and secret must not be empty");
        }
        if twitch.broadcaster_id.trim().is_empty() {
            anyhow::bail!("Broadcaster id must not be empty");
        }

        let retry = RetryConfig {
            max_retries: twitch.max_retries,
            base_delay: Duration::from_secs(twitch.retry_delay),
            ..RetryConfig::default()
        };

        Ok(Self {
            store: StoreConfig::from_args(store),
            sync: SyncSettings::new(twitch.broadcaster_id.trim()),
            helix: HelixSettings {
                client_id: twitch.client_id,
                client_secret: twitch.client_secret,
                api_base: twitch.api_base.trim_end_matches('/').to_string(),
                token_url: twitch.token_url,
                request_timeout: Duration::from_secs(twitch.request_timeout),
                connect_timeout: Duration::from_secs(twitch.connect_timeout),
                retry,
            },
        })
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Parse a window start given on the command line.
///
/// Accepts an RFC 3339 timestamp (`2024-01-02T00:00:00Z`), a date taken as
/// midnight UTC (`2024-01-02`) or a relative interval in days (`6d`).
pub(crate) fn parse_since(s: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if let Some(days_str) = s.strip_suffix('d') {
        if let Ok(days) = days_str.parse::<i64>() {
            return Ok(now - chrono::Duration::days(days));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive_dt.and_utc());
        }
    }
    if let Ok(ts) = parse_timestamp(s) {
        return Ok(ts);
    }
    anyhow::bail!(
        "Cannot parse '{}' as a window start. Expected a timestamp \
         (2024-01-02T00:00:00Z), a date (2024-01-02) or an interval (6d)",
        s
    )
}

/// Normalize a checkpoint given on the command line.
pub(crate) fn parse_checkpoint(s: &str) -> anyhow::Result<String> {
    let ts = parse_timestamp(s)
        .map_err(|e| anyhow::anyhow!("Invalid checkpoint '{}': {}", s, e))?;
    Ok(format_timestamp(ts))
}
