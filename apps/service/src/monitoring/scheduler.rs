//! Per-monitor polling tasks and their lifecycle.
//!
//! The scheduler runs as a single control task that owns the current *epoch*:
//! one cancellation token plus one polling task per active monitor. Every
//! command arrives over a channel through a [`SchedulerHandle`]. Reconfiguring
//! cancels the epoch, waits for all of its tasks to exit, reloads monitors
//! from the database and starts a new epoch, so the running task set always
//! matches what is persisted.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::detector::{ChangeDetector, DetectorPolicy};
use super::executor::Probe;
use crate::database::Database;
use crate::database::models::Monitor;
use crate::notify::NotifierRegistry;

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    Stopped,
}

/// Global scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Reconfiguring,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Delay before a task's first probe
    pub initial_delay: Duration,
    pub detector: DetectorPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            detector: DetectorPolicy::default(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Reconfigure(oneshot::Sender<usize>),
    ActiveTasks(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Control interface of a running scheduler
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    /// Stop every task, reload monitors and restart. Returns the number of
    /// tasks in the new epoch once they have been started.
    pub async fn reconfigure(&self) -> Result<usize, SchedulerError> {
        self.request(Command::Reconfigure).await
    }

    /// Number of polling tasks that have not exited
    pub async fn active_tasks(&self) -> Result<usize, SchedulerError> {
        self.request(Command::ActiveTasks).await
    }

    /// Cancel all tasks and wait for them to exit
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request(Command::Shutdown).await
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SchedulerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(command(reply_tx)).await.map_err(|_| SchedulerError::Stopped)?;
        reply_rx.await.map_err(|_| SchedulerError::Stopped)
    }
}

/// Monitoring scheduler - owns one polling task per active monitor
pub struct MonitoringScheduler {
    database: Arc<dyn Database>,
    probe: Arc<dyn Probe>,
    client: reqwest::Client,
    settings: SchedulerSettings,
}

/// Tasks started from one load of the monitor definitions
struct Epoch {
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Epoch {
    fn active(&self) -> usize {
        self.tasks.iter().filter(|(_, task)| !task.is_finished()).count()
    }

    /// Cancel every task and wait until all of them have exited
    async fn stop(self) {
        self.cancel.cancel();
        let (names, tasks): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, result) in names.iter().zip(join_all(tasks).await) {
            if let Err(e) = result {
                error!(monitor = %name, error = %e, "monitor task failed");
            }
        }
    }
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(
        database: Arc<dyn Database>,
        probe: Arc<dyn Probe>,
        client: reqwest::Client,
        settings: SchedulerSettings,
    ) -> Self {
        Self { database, probe, client, settings }
    }

    /// Start the control loop and the first epoch
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let task = tokio::spawn(self.run(rx, state_tx));
        (SchedulerHandle { tx, state: state_rx }, task)
    }

    async fn run(self, mut rx: mpsc::Receiver<Command>, state: watch::Sender<SchedulerState>) {
        let mut epoch = self.start_epoch().await;
        state.send_replace(SchedulerState::Running);

        while let Some(command) = rx.recv().await {
            match command {
                Command::Reconfigure(reply) => {
                    info!("reconfiguring monitors");
                    state.send_replace(SchedulerState::Reconfiguring);
                    epoch.stop().await;
                    epoch = self.start_epoch().await;
                    state.send_replace(SchedulerState::Running);
                    let _ = reply.send(epoch.tasks.len());
                }
                Command::ActiveTasks(reply) => {
                    let _ = reply.send(epoch.active());
                }
                Command::Shutdown(reply) => {
                    Self::shut_down(epoch, &state).await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        // Every handle was dropped.
        Self::shut_down(epoch, &state).await;
    }

    async fn shut_down(epoch: Epoch, state: &watch::Sender<SchedulerState>) {
        info!("stopping monitors");
        state.send_replace(SchedulerState::ShuttingDown);
        epoch.stop().await;
        state.send_replace(SchedulerState::Stopped);
        info!("all monitors stopped");
    }

    /// Load the monitor definitions and start one task per active monitor
    async fn start_epoch(&self) -> Epoch {
        let cancel = CancellationToken::new();

        let monitors = match self.database.list_monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!(error = %e, "failed to load monitors");
                Vec::new()
            }
        };

        let notifiers = match NotifierRegistry::load(self.database.as_ref(), &self.client).await {
            Ok(notifiers) => notifiers,
            Err(e) => {
                error!(error = %e, "failed to load notifiers");
                NotifierRegistry::new()
            }
        };

        let detector = Arc::new(ChangeDetector::new(
            Arc::clone(&self.database),
            notifiers,
            self.settings.detector,
        ));

        let mut tasks = Vec::new();
        for monitor in monitors.into_iter().filter(|m| m.active) {
            let frequency = match monitor.frequency_duration() {
                Ok(frequency) => frequency,
                Err(e) => {
                    warn!(monitor = %monitor.name, error = %e, "invalid frequency, monitor not started");
                    continue;
                }
            };

            let name = monitor.name.clone();
            let task = tokio::spawn(poll_monitor(
                monitor,
                frequency,
                self.settings.initial_delay,
                Arc::clone(&self.probe),
                Arc::clone(&detector),
                cancel.child_token(),
            ));
            tasks.push((name, task));
        }

        info!(tasks = tasks.len(), "monitors started");
        Epoch { cancel, tasks }
    }
}

/// Polling loop of one monitor. Probes never overlap.
async fn poll_monitor(
    monitor: Monitor,
    frequency: Duration,
    initial_delay: Duration,
    probe: Arc<dyn Probe>,
    detector: Arc<ChangeDetector>,
    cancel: CancellationToken,
) {
    info!(monitor = %monitor.name, frequency = %humantime::format_duration(frequency), "starting monitor");

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!(monitor = %monitor.name, "shutting down");
            return;
        }
        _ = tokio::time::sleep(initial_delay) => {}
    }

    // First tick completes immediately.
    let mut ticker = interval(frequency);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let status = probe.probe(&monitor, &cancel).await;
        if cancel.is_cancelled() {
            debug!(monitor = %monitor.name, "probe interrupted, result discarded");
            break;
        }
        detector.process(&monitor, &status).await;
    }

    info!(monitor = %monitor.name, "shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseImpl, SaveMode, Store};
    use crate::monitoring::types::Status;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Probe that always answers `200 OK` and counts calls per monitor
    #[derive(Default)]
    struct CountingProbe {
        calls: Mutex<HashMap<String, usize>>,
    }

    impl CountingProbe {
        fn calls(&self, name: &str) -> usize {
            self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn probe(&self, monitor: &Monitor, _cancel: &CancellationToken) -> Status {
            *self.calls.lock().unwrap().entry(monitor.name.clone()).or_default() += 1;
            Status::new(&monitor.name, &monitor.url).with_status(200, "200 OK")
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings { initial_delay: Duration::from_millis(10), detector: DetectorPolicy::default() }
    }

    async fn setup() -> (tempfile::TempDir, Arc<DatabaseImpl>, Arc<CountingProbe>) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("uptime.db")).unwrap();
        let database = Arc::new(DatabaseImpl::new(Arc::new(store)));
        (dir, database, Arc::new(CountingProbe::default()))
    }

    async fn add(database: &DatabaseImpl, name: &str, active: bool, frequency: &str) {
        let mut monitor = Monitor::new(name, "https://example.com");
        monitor.active = active;
        monitor.frequency = frequency.into();
        database.save_monitor(&monitor, SaveMode::Create).await.unwrap();
    }

    #[tokio::test]
    async fn test_one_task_per_active_monitor() {
        let (_dir, database, probe) = setup().await;
        add(&database, "a", true, "1m").await;
        add(&database, "b", true, "1m").await;
        add(&database, "paused", false, "1m").await;
        add(&database, "broken", true, "whenever").await;

        let scheduler = MonitoringScheduler::new(database.clone(), probe.clone(), reqwest::Client::new(), settings());
        let (handle, task) = scheduler.spawn();

        assert_eq!(handle.active_tasks().await.unwrap(), 2);
        assert_eq!(handle.state(), SchedulerState::Running);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(probe.calls("a"), 1);
        assert_eq!(probe.calls("paused"), 0);
        assert_eq!(database.get_status("b").await.unwrap().status_text, "200 OK");

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.state(), SchedulerState::Stopped);
        assert_eq!(handle.active_tasks().await, Err(SchedulerError::Stopped));
    }

    #[tokio::test]
    async fn test_reconfigure_replaces_task_set() {
        let (_dir, database, probe) = setup().await;
        add(&database, "a", true, "1m").await;

        let scheduler = MonitoringScheduler::new(database.clone(), probe.clone(), reqwest::Client::new(), settings());
        let (handle, _task) = scheduler.spawn();
        assert_eq!(handle.active_tasks().await.unwrap(), 1);

        add(&database, "b", true, "30s").await;
        assert_eq!(handle.reconfigure().await.unwrap(), 2);
        assert_eq!(handle.active_tasks().await.unwrap(), 2);

        let mut a = database.get_monitor("a").await.unwrap();
        a.active = false;
        database.save_monitor(&a, SaveMode::Update).await.unwrap();
        assert_eq!(handle.reconfigure().await.unwrap(), 1);
        assert_eq!(handle.active_tasks().await.unwrap(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_every_handle_stops_tasks() {
        let (_dir, database, probe) = setup().await;
        add(&database, "a", true, "1m").await;

        let scheduler = MonitoringScheduler::new(database, probe, reqwest::Client::new(), settings());
        let (handle, task) = scheduler.spawn();
        let state = handle.state.clone();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(*state.borrow(), SchedulerState::Stopped);
    }
}
