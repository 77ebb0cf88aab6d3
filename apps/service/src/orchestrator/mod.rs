/// Orchestrator module - coordinates all components
///
/// The orchestrator is the boot sequence and lifecycle owner:
/// - Opens the database (bounded retry, fatal on failure)
/// - Starts the monitoring scheduler and the retention task
/// - Hands out the admin boundary wired to the running scheduler
/// - Waits for a termination signal and shuts everything down in order
pub mod retention;

#[cfg(test)]
mod tests;

pub use retention::{RetentionCleanup, RetentionPolicy};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admin::Admin;
use crate::config::Config;
use crate::database::{Database, DatabaseImpl, open_database};
use crate::monitoring::{MonitoringExecutor, MonitoringScheduler, Probe, SchedulerHandle};
use crate::notify;

/// Main orchestrator for the uptime service
pub struct Orchestrator {
    database: Arc<DatabaseImpl>,
    scheduler: SchedulerHandle,
    scheduler_task: JoinHandle<()>,
    retention: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Orchestrator {
    /// Create and run an orchestrator until a termination signal arrives
    pub async fn start(config: Config) -> Result<()> {
        let orchestrator = Self::new(config).await?;
        orchestrator.run().await
    }

    /// Create a new orchestrator instance probing with the HTTP executor
    pub async fn new(config: Config) -> Result<Self> {
        let executor = MonitoringExecutor::new(config.probe_policy()).context("failed to build HTTP client")?;
        Self::with_probe(config, Arc::new(executor)).await
    }

    /// Create a new orchestrator instance with a custom probe
    pub async fn with_probe(config: Config, probe: Arc<dyn Probe>) -> Result<Self> {
        info!("Opening database at {}", config.database.path.display());
        let database = open_database(
            &config.database.path,
            config.database.open_attempts,
            config.database.open_backoff,
        )
        .await
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
        let database = Arc::new(database);

        let client = notify::http_client().context("failed to build notifier client")?;
        let scheduler = MonitoringScheduler::new(
            database.clone(),
            probe,
            client,
            config.scheduler_settings(),
        );
        let (scheduler, scheduler_task) = scheduler.spawn();

        let retention = if config.retention.enabled {
            let policy = RetentionPolicy::from(&config.retention);
            info!(
                "Starting retention cleanup: max age {}, every {}",
                humantime::format_duration(policy.max_age),
                humantime::format_duration(policy.interval)
            );
            let cancel = CancellationToken::new();
            let handle = RetentionCleanup::new(database.clone(), policy).start_periodic_cleanup(cancel.clone());
            Some((cancel, handle))
        } else {
            info!("Retention cleanup disabled");
            None
        };

        Ok(Self { database, scheduler, scheduler_task, retention })
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.database.clone()
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Admin boundary that reconfigures this orchestrator's scheduler
    pub fn admin(&self) -> Admin {
        Admin::new(self.database.clone()).with_scheduler(self.scheduler.clone())
    }

    /// Run until Ctrl-C or SIGTERM, then shut down
    pub async fn run(self) -> Result<()> {
        info!("uptime service running");
        shutdown_signal().await;
        info!("termination signal received");
        self.shutdown().await
    }

    /// Stop the retention task and every monitor, waiting for them to exit
    pub async fn shutdown(self) -> Result<()> {
        if let Some((cancel, handle)) = self.retention {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "retention task failed");
            }
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "scheduler already stopped");
        }
        self.scheduler_task.await.context("scheduler task failed")?;

        self.database.store().flush().context("failed to flush database")?;
        info!("shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
