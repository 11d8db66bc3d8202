//! Server clock synchronization from in-band stream metadata.
//!
//! The stream carries timed metadata with the server's idea of "now"
//! (an epoch field or an ISO start date). We keep the offset between server
//! and local time and use it for exactly one thing: computing stream uptime
//! without trusting the viewer's wall clock.

use jiff::Timestamp;
use jiff::civil::DateTime;
use jiff::tz::TimeZone;
use std::time::Duration;

/// Estimate of `server_time - local_time`, learned from stream metadata.
#[derive(Debug, Default)]
pub struct ServerClock {
    offset_ms: Option<i64>,
}

impl ServerClock {
    /// Parses a timed-metadata payload, updating the clock offset when the
    /// payload carries a server timestamp.
    ///
    /// Returns a directly-reported stream uptime when the payload carries
    /// one (`STREAM-TIME` / `X-STREAM-TIME`, seconds), which takes
    /// precedence over any derived value.
    ///
    /// Payloads that are not JSON objects are ignored; metadata is shared
    /// with other stream tooling and most of it is not for us.
    pub fn observe_metadata(&mut self, payload: &[u8]) -> Option<Duration> {
        let json: serde_json::Value = serde_json::from_slice(payload).ok()?;
        let json = json.as_object()?;

        let epoch_seconds = json
            .get("X-SERVER-TIME")
            .or_else(|| json.get("X-TIMESTAMP"))
            .and_then(|v| v.as_f64())
            .filter(|&s| s > 0.0);

        let server_ms = match epoch_seconds {
            Some(seconds) => Some((seconds * 1000.0) as i64),
            None => json
                .get("START-DATE")
                .and_then(|v| v.as_str())
                .and_then(parse_server_time)
                .map(|ts| ts.as_millisecond()),
        };

        if let Some(server_ms) = server_ms {
            let offset = server_ms - Timestamp::now().as_millisecond();
            tracing::debug!(offset_ms = offset, "synced clock from stream metadata");
            self.offset_ms = Some(offset);
        }

        json.get("STREAM-TIME")
            .or_else(|| json.get("X-STREAM-TIME"))
            .and_then(|v| v.as_f64())
            .filter(|&s| s >= 0.0)
            // metadata is untrusted; out-of-range values are dropped, not
            // allowed to panic the control task
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Uptime of a stream that started at `started_at`, per the server's
    /// clock (falling back to local time before the first sync). `None` when
    /// the result would be negative, which means the start timestamp is
    /// ahead of our best time estimate and showing it would be a lie.
    pub fn uptime(&self, started_at: Timestamp) -> Option<Duration> {
        self.uptime_at(started_at, Timestamp::now())
    }

    fn uptime_at(&self, started_at: Timestamp, local_now: Timestamp) -> Option<Duration> {
        let now_ms = local_now.as_millisecond() + self.offset_ms.unwrap_or(0);
        let elapsed_ms = now_ms - started_at.as_millisecond();
        u64::try_from(elapsed_ms).ok().map(Duration::from_millis)
    }
}

/// Lenient server timestamp parsing: RFC 3339 first, then the
/// `YYYY-MM-DD HH:MM:SS` form some endpoints emit (assumed UTC).
pub(crate) fn parse_server_time(s: &str) -> Option<Timestamp> {
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Some(ts);
    }
    DateTime::strptime("%Y-%m-%d %H:%M:%S", s)
        .ok()?
        .to_zoned(TimeZone::UTC)
        .ok()
        .map(|zoned| zoned.timestamp())
}

/// Formats an uptime as `H:MM:SS` for the status surface.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn learns_offset_from_epoch_field() {
        let mut clock = ServerClock::default();
        let server_now = Timestamp::now().as_millisecond() as f64 / 1000.0 + 90.0;
        let payload = format!(r#"{{"X-SERVER-TIME":{server_now}}}"#);
        clock.observe_metadata(payload.as_bytes());

        let offset = clock.offset_ms.unwrap();
        // server runs ~90s ahead of us; allow slack for test execution time
        assert!((89_000..92_000).contains(&offset), "offset {offset}");
    }

    #[test]
    fn falls_back_to_start_date_field() {
        let mut clock = ServerClock::default();
        clock.observe_metadata(br#"{"START-DATE":"2026-01-01T00:00:00Z"}"#);
        assert!(clock.offset_ms.is_some());
    }

    #[test]
    fn reports_direct_stream_time() {
        let mut clock = ServerClock::default();
        let direct = clock.observe_metadata(br#"{"STREAM-TIME":125.0}"#);
        assert_eq!(direct, Some(Duration::from_secs(125)));
        // no server timestamp in that payload, so no offset learned
        assert_eq!(clock.offset_ms, None);
    }

    #[test]
    fn out_of_range_stream_time_is_dropped() {
        let mut clock = ServerClock::default();
        // finite but far beyond what a Duration can hold
        assert_eq!(clock.observe_metadata(br#"{"STREAM-TIME":1e30}"#), None);
        assert_eq!(clock.observe_metadata(br#"{"X-STREAM-TIME":1e308}"#), None);
        assert_eq!(clock.observe_metadata(br#"{"STREAM-TIME":-1.0}"#), None);
        // a sane value still comes through afterwards
        assert_eq!(
            clock.observe_metadata(br#"{"STREAM-TIME":12.0}"#),
            Some(Duration::from_secs(12))
        );
    }

    #[test]
    fn ignores_non_json_payloads() {
        let mut clock = ServerClock::default();
        assert_eq!(clock.observe_metadata(b"ID3\x04\x00binary"), None);
        assert_eq!(clock.offset_ms, None);
    }

    #[test]
    fn negative_uptime_is_clamped_away() {
        let clock = ServerClock { offset_ms: Some(0) };
        let now = "2026-01-02T00:00:00Z".parse::<Timestamp>().unwrap();
        let future_start = "2026-01-02T00:05:00Z".parse::<Timestamp>().unwrap();
        assert_eq!(clock.uptime_at(future_start, now), None);

        let past_start = "2026-01-01T23:00:00Z".parse::<Timestamp>().unwrap();
        assert_eq!(
            clock.uptime_at(past_start, now),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn uptime_applies_the_learned_offset() {
        // server is 10 minutes ahead; a stream that "started in our future"
        // is already 5 minutes old in server time
        let clock = ServerClock {
            offset_ms: Some(600_000),
        };
        let now = "2026-01-02T00:00:00Z".parse::<Timestamp>().unwrap();
        let start = "2026-01-02T00:05:00Z".parse::<Timestamp>().unwrap();
        assert_eq!(clock.uptime_at(start, now), Some(Duration::from_secs(300)));
    }

    #[test]
    fn parses_both_server_time_forms() {
        assert!(parse_server_time("2026-08-01T12:30:00Z").is_some());
        assert!(parse_server_time("2026-08-01 12:30:00").is_some());
        assert!(parse_server_time("not a time").is_none());
    }

    #[test]
    fn formats_uptime_with_hours() {
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1:02:03");
        assert_eq!(format_uptime(Duration::from_secs(59)), "0:00:59");
        assert_eq!(format_uptime(Duration::from_secs(36_000)), "10:00:00");
    }
}
