/// Tests for the orchestrator boot and shutdown sequence
///
/// These tests verify end-to-end functionality of:
/// - Boot (open → migrate → schedule)
/// - Admin changes reaching the running scheduler
/// - Shutdown releasing the store for the next process
use crate::config::Config;
use crate::database::models::Monitor;
use crate::monitoring::{Probe, SchedulerState, Status};
use crate::orchestrator::Orchestrator;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// Probe that answers without touching the network
struct StaticProbe;

#[async_trait]
impl Probe for StaticProbe {
    async fn probe(&self, monitor: &Monitor, _cancel: &CancellationToken) -> Status {
        Status::new(&monitor.name, &monitor.url).with_status(200, "200 OK")
    }
}

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.database.path = dir.join("uptime.db");
    config.database.open_attempts = 5;
    config.database.open_backoff = Duration::from_millis(20);
    config.monitoring.initial_delay = Duration::from_millis(10);
    config.retention.enabled = true;
    config
}

#[tokio::test]
async fn test_admin_changes_reconfigure_running_scheduler() {
    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::with_probe(test_config(dir.path()), Arc::new(StaticProbe)).await.unwrap();
    let admin = orchestrator.admin();

    assert_eq!(orchestrator.scheduler().active_tasks().await.unwrap(), 0);

    admin.create_monitor(&Monitor::new("local", "http://127.0.0.1:9/")).await.unwrap();
    assert_eq!(orchestrator.scheduler().active_tasks().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = orchestrator.database().get_status("local").await.unwrap();
    assert_eq!(status.status_text, "200 OK");

    admin.pause_monitor("local").await.unwrap();
    assert_eq!(orchestrator.scheduler().active_tasks().await.unwrap(), 0);

    let scheduler = orchestrator.scheduler().clone();
    orchestrator.shutdown().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_store_reopens_after_shutdown() {
    let dir = tempdir().unwrap();

    let first = Orchestrator::with_probe(test_config(dir.path()), Arc::new(StaticProbe)).await.unwrap();
    first.admin().create_monitor(&Monitor::new("kept", "http://127.0.0.1:9/")).await.unwrap();
    first.shutdown().await.unwrap();

    let second = Orchestrator::with_probe(test_config(dir.path()), Arc::new(StaticProbe)).await.unwrap();
    assert_eq!(second.admin().get_monitor("kept").await.unwrap().name, "kept");
    assert_eq!(second.scheduler().active_tasks().await.unwrap(), 1);
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_held_store_is_a_fatal_boot_error() {
    let dir = tempdir().unwrap();
    let running = Orchestrator::with_probe(test_config(dir.path()), Arc::new(StaticProbe)).await.unwrap();

    let err = Orchestrator::with_probe(test_config(dir.path()), Arc::new(StaticProbe)).await.err().unwrap();
    assert!(format!("{err:#}").contains("failed to open database"));

    running.shutdown().await.unwrap();
}
