//! Admin boundary: the only path through which monitors and notifiers change.
//!
//! Every mutation is validated first, then persisted, then followed by a
//! scheduler reconfiguration when a scheduler is attached.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::keys::start_of_day;
use crate::database::models::{Monitor, TimeFrame};
use crate::database::{Database, DatabaseError, SaveMode};
use crate::monitoring::stats::{self, WindowStats};
use crate::monitoring::types::Status;
use crate::monitoring::validation::{self, ValidationError};
use crate::monitoring::SchedulerHandle;
use crate::notify::{Notification, NotifierConfig, NotifyError};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl AdminError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdminError::Database(e) if e.is_not_found())
    }
}

/// Full history and aggregates for one monitor
#[derive(Debug, Clone, Serialize)]
pub struct UptimeDetails {
    pub monitor: Monitor,
    /// Newest first
    pub history: Vec<Status>,
    pub day: WindowStats,
    pub month: WindowStats,
}

/// One row of the monitor overview
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub monitor: Monitor,
    pub status: Option<Status>,
    /// Newest entry of the last day matches the expected status code
    pub up: bool,
    /// Uptime over the last day
    pub uptime_percent: f64,
}

pub struct Admin {
    database: Arc<dyn Database>,
    scheduler: Option<SchedulerHandle>,
}

impl Admin {
    /// Admin boundary without a running scheduler (offline administration)
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database, scheduler: None }
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    async fn reconfigure(&self) {
        let Some(scheduler) = &self.scheduler else { return };
        match scheduler.reconfigure().await {
            Ok(tasks) => info!(tasks, "scheduler reconfigured"),
            Err(e) => warn!(error = %e, "failed to reconfigure scheduler"),
        }
    }

    pub async fn create_monitor(&self, monitor: &Monitor) -> Result<(), AdminError> {
        validation::validate_monitor(monitor).await?;
        self.database.save_monitor(monitor, SaveMode::Create).await?;
        info!(monitor = %monitor.name, "monitor created");
        self.reconfigure().await;
        Ok(())
    }

    pub async fn edit_monitor(&self, monitor: &Monitor) -> Result<(), AdminError> {
        validation::validate_monitor(monitor).await?;
        self.database.save_monitor(monitor, SaveMode::Update).await?;
        info!(monitor = %monitor.name, "monitor updated");
        self.reconfigure().await;
        Ok(())
    }

    pub async fn pause_monitor(&self, name: &str) -> Result<(), AdminError> {
        self.set_active(name, false).await
    }

    pub async fn resume_monitor(&self, name: &str) -> Result<(), AdminError> {
        self.set_active(name, true).await
    }

    async fn set_active(&self, name: &str, active: bool) -> Result<(), AdminError> {
        let mut monitor = self.database.get_monitor(name).await?;
        monitor.active = active;
        self.database.save_monitor(&monitor, SaveMode::Update).await?;
        info!(monitor = %name, active, "monitor state changed");
        self.reconfigure().await;
        Ok(())
    }

    /// Remove a monitor; with `also_history` its status and history go too.
    ///
    /// History is deleted only after the scheduler has joined the monitor's
    /// task, so a result still in flight cannot recreate it.
    pub async fn delete_monitor(&self, name: &str, also_history: bool) -> Result<(), AdminError> {
        self.database.delete_monitor(name).await?;
        info!(monitor = %name, "monitor deleted");
        self.reconfigure().await;

        if also_history {
            self.database.delete_history(name).await?;
            info!(monitor = %name, "monitor history deleted");
        }
        Ok(())
    }

    /// Delete every history entry of `name` up to midnight UTC starting `cutoff`
    pub async fn purge_history(&self, name: &str, cutoff: NaiveDate) -> Result<usize, AdminError> {
        let removed = self.database.purge_history(name, start_of_day(cutoff)).await?;
        info!(monitor = %name, %cutoff, removed, "history purged");
        Ok(removed)
    }

    pub async fn get_monitor(&self, name: &str) -> Result<Monitor, AdminError> {
        Ok(self.database.get_monitor(name).await?)
    }

    pub async fn list_monitors(&self) -> Result<Vec<Monitor>, AdminError> {
        Ok(self.database.list_monitors().await?)
    }

    /// History of `name` within `window`, newest first
    pub async fn get_history(&self, name: &str, window: TimeFrame) -> Result<Vec<Status>, AdminError> {
        let mut history = stats::window_history(self.database.as_ref(), name, window, Utc::now()).await?;
        history.reverse();
        Ok(history)
    }

    pub async fn get_uptime_details(&self, name: &str) -> Result<UptimeDetails, AdminError> {
        let monitor = self.database.get_monitor(name).await?;
        let now = Utc::now();
        let database = self.database.as_ref();

        let mut history = stats::window_history(database, name, TimeFrame::All, now).await?;
        let day = stats::window_stats(database, &monitor, TimeFrame::Day, now).await?;
        let month = stats::window_stats(database, &monitor, TimeFrame::Month, now).await?;
        history.reverse();

        Ok(UptimeDetails { monitor, history, day, month })
    }

    pub async fn list_monitors_for_display(&self) -> Result<Vec<MonitorSummary>, AdminError> {
        let now = Utc::now();
        let mut summaries = Vec::new();

        for monitor in self.database.list_monitors().await? {
            let status = match self.database.get_status(&monitor.name).await {
                Ok(status) => Some(status),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };

            let day = stats::window_history(self.database.as_ref(), &monitor.name, TimeFrame::Day, now).await?;
            let up = day.last().is_some_and(|s| s.status_code == monitor.expected_status_code);
            let uptime_percent = stats::uptime_percent(&day, monitor.expected_status_code);

            summaries.push(MonitorSummary { monitor, status, up, uptime_percent });
        }

        Ok(summaries)
    }

    pub async fn create_notifier(&self, name: &str, config: &NotifierConfig) -> Result<(), AdminError> {
        validate_notifier(name, config)?;
        self.database.save_notifier(name, config, SaveMode::Create).await?;
        info!(notifier = %name, kind = config.kind(), "notifier created");
        self.reconfigure().await;
        Ok(())
    }

    pub async fn update_notifier(&self, name: &str, config: &NotifierConfig) -> Result<(), AdminError> {
        validate_notifier(name, config)?;
        self.database.save_notifier(name, config, SaveMode::Update).await?;
        info!(notifier = %name, kind = config.kind(), "notifier updated");
        self.reconfigure().await;
        Ok(())
    }

    pub async fn get_notifier(&self, name: &str) -> Result<NotifierConfig, AdminError> {
        Ok(self.database.get_notifier(name).await?)
    }

    pub async fn list_notifiers(&self) -> Result<Vec<(String, NotifierConfig)>, AdminError> {
        Ok(self.database.list_notifiers().await?)
    }

    /// Delete a notifier and detach it from every monitor
    pub async fn delete_notifier(&self, name: &str) -> Result<(), AdminError> {
        self.database.delete_notifier(name).await?;
        info!(notifier = %name, "notifier deleted");
        self.reconfigure().await;
        Ok(())
    }

    /// Send a test notification through a stored notifier
    pub async fn test_notifier(&self, name: &str, client: &reqwest::Client) -> Result<(), AdminError> {
        let config = self.database.get_notifier(name).await?;
        config.build(client).send(&Notification::test()).await?;
        Ok(())
    }
}

fn validate_notifier(name: &str, config: &NotifierConfig) -> Result<(), AdminError> {
    validation::validate_name(name)?;
    let complete = match config {
        NotifierConfig::Slack(c) => !c.token.is_empty() && !c.channel.is_empty(),
        NotifierConfig::Discord(c) => !c.url.is_empty(),
        NotifierConfig::Mailgun(c) => !c.api_key.is_empty() && !c.domain.is_empty() && !c.recipients.is_empty(),
    };
    if !complete {
        return Err(NotifyError::InvalidConfiguration(format!("{} notifier {name:?} is incomplete", config.kind())).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseImpl, Store};
    use crate::notify::DiscordConfig;
    use chrono::TimeDelta;
    use std::time::Duration;
    use tempfile::tempdir;

    fn admin() -> (tempfile::TempDir, Arc<DatabaseImpl>, Admin) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("uptime.db")).unwrap();
        let database = Arc::new(DatabaseImpl::new(Arc::new(store)));
        let admin = Admin::new(database.clone());
        (dir, database, admin)
    }

    fn local_monitor(name: &str) -> Monitor {
        Monitor::new(name, "http://127.0.0.1:8080/health")
    }

    #[tokio::test]
    async fn test_invalid_monitors_never_reach_the_store() {
        let (_dir, database, admin) = admin();

        let mut bad_frequency = local_monitor("a");
        bad_frequency.frequency = "now and then".into();
        assert!(matches!(
            admin.create_monitor(&bad_frequency).await,
            Err(AdminError::Validation(ValidationError::InvalidFrequency(..)))
        ));

        let bad_scheme = Monitor::new("b", "ftp://127.0.0.1/");
        assert!(matches!(
            admin.create_monitor(&bad_scheme).await,
            Err(AdminError::Validation(ValidationError::InvalidScheme(_)))
        ));

        assert!(database.list_monitors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pause_resume_and_delete() {
        let (_dir, database, admin) = admin();
        admin.create_monitor(&local_monitor("a")).await.unwrap();

        admin.pause_monitor("a").await.unwrap();
        assert!(!admin.get_monitor("a").await.unwrap().active);
        admin.resume_monitor("a").await.unwrap();
        assert!(admin.get_monitor("a").await.unwrap().active);

        let at = Utc::now();
        database.append_history(&Status::new("a", "x").at(at).with_status(200, "200 OK")).await.unwrap();

        admin.delete_monitor("a", false).await.unwrap();
        assert!(admin.get_monitor("a").await.unwrap_err().is_not_found());
        assert_eq!(admin.get_history("a", TimeFrame::Hour).await.unwrap().len(), 1);

        assert!(admin.pause_monitor("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_details_aggregate() {
        let (_dir, database, admin) = admin();
        admin.create_monitor(&local_monitor("a")).await.unwrap();

        let now = Utc::now();
        for (minutes_ago, code, latency) in [(50, 200, 10), (40, 503, 20), (30, 200, 30), (20, 200, 40)] {
            let status = Status::new("a", "x")
                .at(now - TimeDelta::minutes(minutes_ago))
                .with_status(code, code.to_string())
                .with_latency(Duration::from_millis(latency));
            database.append_history(&status).await.unwrap();
        }
        // Outside the day window but inside the month.
        let old = Status::new("a", "x").at(now - TimeDelta::days(3)).with_status(503, "503");
        database.append_history(&old).await.unwrap();

        let history = admin.get_history("a", TimeFrame::Hour).await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(history.windows(2).all(|w| w[0].timestamp > w[1].timestamp));

        let details = admin.get_uptime_details("a").await.unwrap();
        assert_eq!(details.history.len(), 5);
        assert_eq!(details.day.uptime_percent, 75.0);
        assert_eq!(details.day.average_latency_ms, 25);
        assert_eq!(details.month.samples, 5);
        assert_eq!(details.month.uptime_percent, 60.0);

        let summary = admin.list_monitors_for_display().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert!(summary[0].up);
        assert!(summary[0].status.is_none());
        assert_eq!(summary[0].uptime_percent, 75.0);
    }

    #[tokio::test]
    async fn test_purge_uses_midnight_of_cutoff_date() {
        let (_dir, database, admin) = admin();
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let midnight = start_of_day(day);
        for at in [midnight - TimeDelta::hours(1), midnight, midnight + TimeDelta::seconds(1)] {
            database.append_history(&Status::new("a", "x").at(at).with_status(200, "200 OK")).await.unwrap();
        }

        assert_eq!(admin.purge_history("a", day).await.unwrap(), 2);
        let left = database.history("a", None, midnight + TimeDelta::days(1)).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].timestamp, midnight + TimeDelta::seconds(1));
    }

    #[tokio::test]
    async fn test_notifier_validation() {
        let (_dir, _database, admin) = admin();
        let empty = NotifierConfig::Discord(DiscordConfig { url: String::new() });
        assert!(matches!(
            admin.create_notifier("ops", &empty).await,
            Err(AdminError::Notify(NotifyError::InvalidConfiguration(_)))
        ));

        let config = NotifierConfig::Discord(DiscordConfig { url: "https://discord.invalid/hook".into() });
        admin.create_notifier("ops", &config).await.unwrap();
        assert_eq!(admin.list_notifiers().await.unwrap(), vec![("ops".to_string(), config)]);
    }
}
