use chrono::{DateTime, NaiveDate, Utc};

pub const DAY_MS: i64 = 86_400_000;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Parses an entry date given as `YYYY-MM-DD` (midnight UTC) or an RFC 3339 instant.
pub fn parse_entry_date(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(day) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return day
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn plain_dates_are_midnight_utc() {
        let ms = parse_entry_date("2024-03-01").expect("date parses");
        assert_eq!(to_date(ms).to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn rfc3339_dates_are_normalised_to_utc() {
        let ms = parse_entry_date("2024-03-01T10:00:00+02:00").expect("instant parses");
        assert_eq!(to_date(ms).to_rfc3339(), "2024-03-01T08:00:00+00:00");
    }

    #[test]
    fn garbage_dates_are_rejected() {
        assert_eq!(parse_entry_date(""), None);
        assert_eq!(parse_entry_date("2024-13-01"), None);
        assert_eq!(parse_entry_date("yesterday"), None);
    }
}
