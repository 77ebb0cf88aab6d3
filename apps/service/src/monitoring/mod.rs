pub mod checker;
pub mod detector;
/// Monitoring engine module - handles execution of monitoring checks
///
/// This module is responsible for:
/// - Probing endpoints, currently over HTTP/HTTPS
/// - Scheduling one polling task per active monitor
/// - Deciding which observations are persisted and alerted on
/// - Aggregating history for display
pub mod executor;
pub mod scheduler;
pub mod stats;
pub mod types;
pub mod validation;

pub use checker::ProbePolicy;
pub use detector::{ChangeDetector, DetectorPolicy, Outcome};
pub use executor::{MonitoringExecutor, Probe};
pub use scheduler::{MonitoringScheduler, SchedulerError, SchedulerHandle, SchedulerSettings, SchedulerState};
pub use types::{NotificationKind, Status};
