//! Timestamp handling and the checkpoint reconciliation rule.

use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};

use super::error::SyncError;

/// Window start used when no checkpoint has ever been written.
pub const EPOCH_START: &str = "2021-07-21T00:00:00Z";

/// How far a stalled window jumps forward.
pub const STALL_ADVANCE_DAYS: i64 = 6;

/// Format as `YYYY-MM-DDTHH:MM:SSZ`, the checkpoint and query format.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp, dropping sub-second precision.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| whole_seconds(ts.with_timezone(&Utc)))
        .map_err(|source| SyncError::InvalidTimestamp {
            value: value.to_string(),
            source,
        })
}

pub fn whole_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Next checkpoint after a page whose newest clip is `latest` (`None` for an
/// empty page), or `None` if the checkpoint should stay at `previous`.
///
/// Forward progress moves to `latest`. A page that made no progress, or had
/// no clips, advances `stall_advance` past `previous` but never beyond `now`.
/// The result is always strictly greater than `previous`, even when the
/// clock is behind it.
pub fn reconcile(
    previous: DateTime<Utc>,
    latest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stall_advance: Duration,
) -> Option<DateTime<Utc>> {
    let candidate = match latest {
        Some(latest) if latest > previous => latest,
        Some(latest) if latest == previous => (latest + stall_advance).min(now),
        Some(_) => return None,
        None => (previous + stall_advance).min(now),
    };
    (candidate > previous).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn six_days() -> Duration {
        Duration::days(STALL_ADVANCE_DAYS)
    }

    #[test]
    fn test_format_is_fixed_width_utc() {
        assert_eq!(format_timestamp(ts(EPOCH_START)), EPOCH_START);
        assert_eq!(
            format_timestamp(ts("2024-06-01T02:00:00.750+02:00")),
            "2024-06-01T00:00:00Z"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(SyncError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_forward_progress_takes_latest() {
        let next = reconcile(
            ts("2024-01-01T00:00:00Z"),
            Some(ts("2024-01-02T00:00:00Z")),
            ts("2024-06-01T00:00:00Z"),
            six_days(),
        );
        assert_eq!(next, Some(ts("2024-01-02T00:00:00Z")));
    }

    #[test]
    fn test_stalled_page_advances_six_days() {
        let next = reconcile(
            ts("2024-06-01T00:00:00Z"),
            Some(ts("2024-06-01T00:00:00Z")),
            ts("2024-06-10T00:00:00Z"),
            six_days(),
        );
        assert_eq!(next, Some(ts("2024-06-07T00:00:00Z")));
    }

    #[test]
    fn test_empty_page_advances_clamped_to_now() {
        let previous = ts("2024-06-01T00:00:00Z");
        assert_eq!(
            reconcile(previous, None, ts("2024-06-10T00:00:00Z"), six_days()),
            Some(ts("2024-06-07T00:00:00Z"))
        );
        assert_eq!(
            reconcile(previous, None, ts("2024-06-02T00:00:00Z"), six_days()),
            Some(ts("2024-06-02T00:00:00Z"))
        );
    }

    #[test]
    fn test_older_page_leaves_checkpoint() {
        let next = reconcile(
            ts("2024-06-01T00:00:00Z"),
            Some(ts("2024-05-20T00:00:00Z")),
            ts("2024-06-10T00:00:00Z"),
            six_days(),
        );
        assert_eq!(next, None);
    }

    #[test]
    fn test_clock_behind_checkpoint_never_regresses() {
        let previous = ts("2024-06-10T00:00:00Z");
        let now = ts("2024-06-05T00:00:00Z");
        assert_eq!(reconcile(previous, None, now, six_days()), None);
        assert_eq!(reconcile(previous, Some(previous), now, six_days()), None);
        assert_eq!(reconcile(previous, None, previous, six_days()), None);
    }
}
