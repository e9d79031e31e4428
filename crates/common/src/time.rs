use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Render an epoch-millis timestamp as `YYYY-MM-DD HH:MM UTC`.
///
/// Out-of-range values fall back to the raw number so display code never
/// has to deal with an error path.
pub fn format_epoch_millis(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_is_recent() {
        // Anything after 2020 and before 2100.
        let now = epoch_millis();
        assert!(now > 1_577_836_800_000);
        assert!(now < 4_102_444_800_000);
    }

    #[test]
    fn formats_known_timestamp() {
        // 2024-01-15 12:30:00 UTC
        assert_eq!(format_epoch_millis(1_705_321_800_000), "2024-01-15 12:30 UTC");
    }

    #[test]
    fn out_of_range_falls_back_to_raw() {
        assert_eq!(format_epoch_millis(i64::MAX), i64::MAX.to_string());
    }
}
