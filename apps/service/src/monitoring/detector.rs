//! Decides what happens to each observation: suppress it, or alert and persist it.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, error, info, warn};

use super::types::{NotificationKind, Status};
use crate::database::Database;
use crate::database::models::Monitor;
use crate::notify::{Notification, NotifierRegistry};

/// Thresholds applied by [`ChangeDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorPolicy {
    /// Unchanged observations younger than this are dropped
    pub suppression_window: Duration,
    /// Certificates with fewer days left than this raise an alert
    pub cert_expiry_days: i64,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            suppression_window: Duration::from_secs(3600),
            cert_expiry_days: 10,
        }
    }
}

/// What [`ChangeDetector::process`] did with an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Same status text as the stored one, within the suppression window
    Suppressed,
    /// Current status was written
    Recorded {
        changed: bool,
        cert_alert: bool,
        history_written: bool,
    },
    /// Writing the current status failed; nothing was persisted
    Aborted,
}

pub struct ChangeDetector {
    database: Arc<dyn Database>,
    notifiers: NotifierRegistry,
    policy: DetectorPolicy,
}

impl ChangeDetector {
    pub fn new(database: Arc<dyn Database>, notifiers: NotifierRegistry, policy: DetectorPolicy) -> Self {
        Self { database, notifiers, policy }
    }

    /// Compare `status` with the stored current status of `monitor` and act on it.
    pub async fn process(&self, monitor: &Monitor, status: &Status) -> Outcome {
        let previous = match self.database.get_status(&monitor.name).await {
            Ok(previous) => previous,
            Err(e) if e.is_not_found() => Status::default(),
            Err(e) => {
                warn!(monitor = %monitor.name, error = %e, "failed to read previous status");
                Status::default()
            }
        };

        let same = status.status_text == previous.status_text;
        if same {
            let window = TimeDelta::from_std(self.policy.suppression_window).unwrap_or(TimeDelta::MAX);
            if status.timestamp - previous.timestamp < window {
                debug!(monitor = %monitor.name, status = %status.status_text, "no change in window, skipping");
                return Outcome::Suppressed;
            }
        } else {
            info!(
                monitor = %monitor.name,
                previous = %previous.status_text,
                status = %status.status_text,
                "status change"
            );
            self.notify(monitor, NotificationKind::StatusChanged, status).await;
        }

        // Only evaluated on the unchanged (heartbeat) branch.
        let cert_alert = same && self.certificate_expiring(status);
        if cert_alert {
            info!(
                monitor = %monitor.name,
                days = status.certificate_days_remaining,
                "certificate expiring"
            );
            self.notify(monitor, NotificationKind::CertificateExpiring, status).await;
        }

        if let Err(e) = self.database.put_status(status).await {
            error!(monitor = %monitor.name, error = %e, "failed to update status");
            return Outcome::Aborted;
        }

        let history_written = match self.database.append_history(status).await {
            Ok(()) => true,
            Err(e) => {
                error!(monitor = %monitor.name, error = %e, "failed to append history");
                false
            }
        };

        info!(monitor = %monitor.name, status = %status.status_text, "status updated");
        Outcome::Recorded { changed: !same, cert_alert, history_written }
    }

    /// Probes without TLS info report 0 days, so they alert too.
    fn certificate_expiring(&self, status: &Status) -> bool {
        status.certificate_days_remaining < self.policy.cert_expiry_days
    }

    async fn notify(&self, monitor: &Monitor, kind: NotificationKind, status: &Status) {
        if monitor.notifiers.is_empty() {
            return;
        }
        let notification = Notification::new(kind, status.clone(), monitor.expected_status_code);
        self.notifiers.dispatch(&monitor.notifiers, &notification).await;
    }
}
