use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::checker::{Checker, HttpChecker, ProbePolicy, UnimplementedChecker};
use super::types::Status;
use crate::database::models::{Monitor, MonitorType};

/// Produces one observation for one monitor.
///
/// Implementations never fail: every outcome, including transport errors and
/// unsupported monitor types, is reported as a [`Status`].
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, monitor: &Monitor, cancel: &CancellationToken) -> Status;
}

/// Monitoring executor - dispatches a monitor to the checker for its type
pub struct MonitoringExecutor {
    http_checker: HttpChecker,
    unimplemented: UnimplementedChecker,
}

impl MonitoringExecutor {
    /// Create a new monitoring executor
    pub fn new(policy: ProbePolicy) -> reqwest::Result<Self> {
        Ok(Self {
            http_checker: HttpChecker::new(policy)?,
            unimplemented: UnimplementedChecker,
        })
    }

    fn checker(&self, monitor_type: MonitorType) -> &dyn Checker {
        match monitor_type {
            MonitorType::Http => &self.http_checker,
            MonitorType::Ping | MonitorType::Tcp => &self.unimplemented,
        }
    }
}

#[async_trait]
impl Probe for MonitoringExecutor {
    async fn probe(&self, monitor: &Monitor, cancel: &CancellationToken) -> Status {
        self.checker(monitor.monitor_type).check(monitor, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_by_type() {
        let executor = MonitoringExecutor::new(ProbePolicy::default()).unwrap();

        let mut monitor = Monitor::new("ping", "example.com");
        monitor.monitor_type = MonitorType::Ping;

        let status = executor.probe(&monitor, &CancellationToken::new()).await;
        assert_eq!(status.status_text, "unimplemented monitor type ping");
        assert_eq!(status.site, "ping");
    }
}
