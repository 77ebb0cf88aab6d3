use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One probe observation.
///
/// Stored twice when accepted: as the monitor's current status
/// (`status/<name>`, overwritten) and as a history entry keyed by
/// `timestamp` (`history/<name>/<timestamp>`, append-only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Name of the monitor that produced this observation
    pub site: String,

    /// URL that was probed
    pub url: String,

    /// When the probe started
    pub timestamp: DateTime<Utc>,

    /// HTTP status code, 0 when no response was received
    #[serde(default)]
    pub status_code: u16,

    /// Human readable outcome, e.g. `200 OK` or the transport error
    #[serde(default)]
    pub status_text: String,

    /// Wall-clock latency of the attempt that produced this observation
    #[serde(default, with = "humantime_serde")]
    pub response_latency: Duration,

    /// Whole days until the leaf certificate expires, 0 without TLS
    #[serde(default)]
    pub certificate_days_remaining: i64,
}

impl Status {
    /// Blank observation for `site` taken now
    pub fn new(site: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            url: url.into(),
            timestamp: Utc::now(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, code: u16, text: impl Into<String>) -> Self {
        self.status_code = code;
        self.status_text = text.into();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.response_latency = latency;
        self
    }

    pub fn with_certificate_days(mut self, days: i64) -> Self {
        self.certificate_days_remaining = days;
        self
    }
}

/// Reason a notifier is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusChanged,
    CertificateExpiring,
    Test,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::StatusChanged => write!(f, "status changed"),
            NotificationKind::CertificateExpiring => write!(f, "certificate expiring"),
            NotificationKind::Test => write!(f, "test"),
        }
    }
}
