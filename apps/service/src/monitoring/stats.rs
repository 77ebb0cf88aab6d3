use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::Status;
use crate::database::models::{Monitor, TimeFrame};
use crate::database::{Database, DatabaseError};

/// Share of `history` whose status code equals `expected`, as a percentage.
///
/// An empty history yields 0.
pub fn uptime_percent(history: &[Status], expected: u16) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let good = history.iter().filter(|s| s.status_code == expected).count();
    good as f64 / history.len() as f64 * 100.0
}

/// Mean response latency in whole milliseconds, truncated. 0 for an empty history.
pub fn average_latency(history: &[Status]) -> u64 {
    if history.is_empty() {
        return 0;
    }
    let total: u128 = history.iter().map(|s| s.response_latency.as_nanos()).sum();
    let mean = Duration::from_nanos((total / history.len() as u128) as u64);
    mean.as_millis() as u64
}

/// Keep only the first entry of every run of identical status codes
pub fn compact(history: &[Status]) -> Vec<Status> {
    let mut runs: Vec<Status> = Vec::new();
    for status in history {
        if runs.last().is_some_and(|last| last.status_code == status.status_code) {
            continue;
        }
        runs.push(status.clone());
    }
    runs
}

/// Aggregates over one trailing window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub window: TimeFrame,
    pub uptime_percent: f64,
    pub average_latency_ms: u64,
    pub samples: usize,
}

impl WindowStats {
    pub fn from_history(window: TimeFrame, history: &[Status], expected: u16) -> Self {
        Self {
            window,
            uptime_percent: uptime_percent(history, expected),
            average_latency_ms: average_latency(history),
            samples: history.len(),
        }
    }
}

/// History of `monitor` inside `window` ending at `now`, oldest first.
///
/// A monitor that has never been recorded has an empty history.
pub async fn window_history(
    database: &dyn Database,
    monitor: &str,
    window: TimeFrame,
    now: DateTime<Utc>,
) -> Result<Vec<Status>, DatabaseError> {
    match database.history(monitor, window.lower_bound(now), now).await {
        Ok(history) => Ok(history),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Uptime and latency of `monitor` over `window`
pub async fn window_stats(
    database: &dyn Database,
    monitor: &Monitor,
    window: TimeFrame,
    now: DateTime<Utc>,
) -> Result<WindowStats, DatabaseError> {
    let history = window_history(database, &monitor.name, window, now).await?;
    Ok(WindowStats::from_history(window, &history, monitor.expected_status_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(code: u16, latency_ms: u64) -> Status {
        Status::new("example", "https://example.com")
            .with_status(code, code.to_string())
            .with_latency(Duration::from_millis(latency_ms))
    }

    #[test]
    fn test_uptime_percent() {
        assert_eq!(uptime_percent(&[], 200), 0.0);
        assert_eq!(uptime_percent(&[sample(200, 1), sample(200, 1)], 200), 100.0);
        assert_eq!(
            uptime_percent(&[sample(200, 1), sample(503, 1), sample(200, 1), sample(0, 1)], 200),
            50.0
        );
    }

    #[test]
    fn test_average_latency_truncates() {
        assert_eq!(average_latency(&[]), 0);
        let history = [sample(200, 10), sample(200, 11)];
        assert_eq!(average_latency(&history), 10);

        let sub_ms = [sample(200, 0).with_latency(Duration::from_micros(1900))];
        assert_eq!(average_latency(&sub_ms), 1);
    }

    #[test]
    fn test_compact_keeps_first_of_each_run() {
        let history = vec![
            sample(200, 1),
            sample(200, 2),
            sample(503, 3),
            sample(503, 4),
            sample(200, 5),
        ];
        let runs = compact(&history);
        let summary: Vec<_> = runs.iter().map(|s| (s.status_code, s.response_latency.as_millis())).collect();
        assert_eq!(summary, vec![(200, 1), (503, 3), (200, 5)]);
        assert!(compact(&[]).is_empty());
    }
}
