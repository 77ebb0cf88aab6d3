//! Sortable keys for time-series buckets.
//!
//! History keys are UTC timestamps with a fixed nanosecond fraction, so byte
//! order and chronological order agree.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Key under which an observation taken at `at` is stored.
pub fn timestamp_key(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Midnight UTC at the start of `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_keys_sort_chronologically() {
        let base = Utc.with_ymd_and_hms(2024, 9, 9, 23, 59, 59).unwrap();
        let times = [
            base,
            base + Duration::nanoseconds(1),
            base + Duration::milliseconds(10),
            base + Duration::seconds(1),
            base + Duration::days(400),
        ];

        let keys: Vec<String> = times.iter().map(timestamp_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.iter().all(|k| k.len() == keys[0].len()));
    }

    #[test]
    fn test_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(timestamp_key(&at), "2024-01-02T03:04:05.000000000Z");
    }

    #[test]
    fn test_start_of_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(timestamp_key(&start_of_day(date)), "2024-03-01T00:00:00.000000000Z");
    }
}
