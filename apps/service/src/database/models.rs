use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::validation::ValidationError;

/// Expected status code for a new HTTP monitor.
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Kind of probe a monitor is checked with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    #[default]
    Http,
    Ping,
    Tcp,
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorType::Http => write!(f, "http"),
            MonitorType::Ping => write!(f, "ping"),
            MonitorType::Tcp => write!(f, "tcp"),
        }
    }
}

impl FromStr for MonitorType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(MonitorType::Http),
            "ping" | "icmp" => Ok(MonitorType::Ping),
            "tcp" => Ok(MonitorType::Tcp),
            other => Err(ValidationError::UnknownMonitorType(other.to_string())),
        }
    }
}

/// Monitor model - a configured endpoint, stored under `monitors/<name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub monitor_type: MonitorType,
    /// Poll period as a duration string, e.g. `1m` or `30s`
    pub frequency: String,
    /// Probe timeout as a duration string; empty means the configured default
    #[serde(default)]
    pub timeout: String,
    #[serde(default = "default_expected_status")]
    pub expected_status_code: u16,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub notifiers: Vec<String>,
}

fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

fn default_active() -> bool {
    true
}

impl Monitor {
    /// Create an active HTTP monitor polled every minute
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            monitor_type: MonitorType::Http,
            frequency: "1m".to_string(),
            timeout: String::new(),
            expected_status_code: DEFAULT_EXPECTED_STATUS,
            active: true,
            notifiers: Vec::new(),
        }
    }

    /// Parsed poll period. Zero is rejected since it cannot drive a timer.
    pub fn frequency_duration(&self) -> Result<Duration, ValidationError> {
        let frequency = humantime::parse_duration(self.frequency.trim())
            .map_err(|e| ValidationError::InvalidFrequency(self.frequency.clone(), e.to_string()))?;
        if frequency.is_zero() {
            return Err(ValidationError::InvalidFrequency(
                self.frequency.clone(),
                "must be greater than zero".to_string(),
            ));
        }
        Ok(frequency)
    }

    /// Parsed probe timeout, `None` when unset or unparsable.
    pub fn timeout_duration(&self) -> Option<Duration> {
        humantime::parse_duration(self.timeout.trim()).ok().filter(|t| !t.is_zero())
    }
}

/// Trailing lookback window for history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFrame {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFrame {
    /// Length of the window; `None` for [`TimeFrame::All`].
    pub fn duration(self) -> Option<chrono::TimeDelta> {
        match self {
            TimeFrame::Hour => Some(chrono::TimeDelta::hours(1)),
            TimeFrame::Day => Some(chrono::TimeDelta::days(1)),
            TimeFrame::Week => Some(chrono::TimeDelta::days(7)),
            TimeFrame::Month => Some(chrono::TimeDelta::days(30)),
            TimeFrame::Year => Some(chrono::TimeDelta::days(365)),
            TimeFrame::All => None,
        }
    }

    /// Earliest timestamp inside the window ending at `now`.
    pub fn lower_bound(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration().map(|window| now - window)
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeFrame::Hour => "hour",
            TimeFrame::Day => "day",
            TimeFrame::Week => "week",
            TimeFrame::Month => "month",
            TimeFrame::Year => "year",
            TimeFrame::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for TimeFrame {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeFrame::Hour),
            "day" => Ok(TimeFrame::Day),
            "week" => Ok(TimeFrame::Week),
            "month" => Ok(TimeFrame::Month),
            "year" => Ok(TimeFrame::Year),
            "all" => Ok(TimeFrame::All),
            other => Err(ValidationError::UnknownTimeFrame(other.to_string())),
        }
    }
}
