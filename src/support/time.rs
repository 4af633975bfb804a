//! Timestamps in the format charge points expect

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`, shifted by `delta_secs`.
pub fn iso_time(delta_secs: i64) -> String {
    format_iso(Utc::now() + Duration::seconds(delta_secs))
}

pub fn format_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_millis_and_zulu() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_iso(at), "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn delta_moves_forward() {
        let now = DateTime::parse_from_rfc3339(&iso_time(0)).unwrap();
        let later = DateTime::parse_from_rfc3339(&iso_time(300)).unwrap();
        let diff = (later - now).num_seconds();
        assert!((299..=301).contains(&diff));
    }
}
