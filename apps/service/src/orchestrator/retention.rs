//! Automatic retention of monitoring history.
//!
//! When enabled, history entries older than the configured maximum age are
//! purged for every monitor that has history, on a fixed interval, as a
//! background task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::{Database, DatabaseError};

/// Retention policy for history entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Entries older than this are deleted
    pub max_age: Duration,
    /// Time between cleanup runs
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self { max_age: config.max_age, interval: config.interval }
    }
}

impl RetentionPolicy {
    /// Newest timestamp that is purged at `now`; `None` when `max_age`
    /// reaches past the earliest representable time
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(TimeDelta::from_std(self.max_age).ok()?)
    }
}

/// Cleanup manager for expired history
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    /// Create a new retention cleanup manager
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Purge expired history of every monitor. Returns the number of entries removed.
    ///
    /// A failure for one monitor is logged and does not stop the others.
    pub async fn cleanup_expired_history(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let Some(cutoff) = self.policy.cutoff(now) else {
            debug!(max_age = %humantime::format_duration(self.policy.max_age), "nothing old enough to purge");
            return Ok(0);
        };
        info!(%cutoff, "Starting retention cleanup");

        let mut removed = 0;
        for site in self.database.history_sites().await? {
            match self.database.purge_history(&site, cutoff).await {
                Ok(count) => {
                    debug!(monitor = %site, count, "purged expired history");
                    removed += count;
                }
                Err(e) => warn!(monitor = %site, error = %e, "failed to purge history"),
            }
        }

        info!("Retention cleanup completed: {} history entries deleted", removed);
        Ok(removed)
    }

    /// Start background cleanup task; it exits when `cancel` fires
    pub fn start_periodic_cleanup(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.interval);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = self.cleanup_expired_history(Utc::now()).await {
                    warn!("Periodic history cleanup failed: {}", e);
                }
            }

            debug!("retention task stopped");
        })
    }
}
