use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::engine::Store;
use super::error::DatabaseError;
use super::keys::timestamp_key;
use super::models::Monitor;
use crate::monitoring::types::Status;
use crate::notify::NotifierConfig;

pub const MONITORS: &str = "monitors";
pub const STATUS: &str = "status";
pub const HISTORY: &str = "history";
pub const NOTIFY: &str = "notify";
pub const META: &str = "meta";

const NOTIFY_TYPE: &str = "type";
const NOTIFY_DATA: &str = "data";

/// Whether a monitor or notifier save must create a new record or replace one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Create,
    Update,
}

/// Database trait for abstracting storage operations
#[async_trait]
pub trait Database: Send + Sync {
    /// Get a monitor by name
    async fn get_monitor(&self, name: &str) -> Result<Monitor, DatabaseError>;

    /// Get all monitors, ordered by name
    async fn list_monitors(&self) -> Result<Vec<Monitor>, DatabaseError>;

    /// Save a monitor
    async fn save_monitor(&self, monitor: &Monitor, mode: SaveMode) -> Result<(), DatabaseError>;

    /// Delete a monitor definition; its status and history are untouched
    async fn delete_monitor(&self, name: &str) -> Result<(), DatabaseError>;

    /// Current status of a monitor
    async fn get_status(&self, name: &str) -> Result<Status, DatabaseError>;

    /// Overwrite the current status of `status.site`
    async fn put_status(&self, status: &Status) -> Result<(), DatabaseError>;

    /// Append `status` to the history of `status.site`
    async fn append_history(&self, status: &Status) -> Result<(), DatabaseError>;

    /// History entries with `lower <= timestamp <= upper`, oldest first
    async fn history(
        &self,
        name: &str,
        lower: Option<DateTime<Utc>>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<Status>, DatabaseError>;

    /// Remove the history bucket and current status of a monitor
    async fn delete_history(&self, name: &str) -> Result<(), DatabaseError>;

    /// Delete history entries with `timestamp <= cutoff`, returning how many went
    async fn purge_history(&self, name: &str, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError>;

    /// Names of every monitor that has a history bucket
    async fn history_sites(&self) -> Result<Vec<String>, DatabaseError>;

    /// Save a notifier configuration under `notify/<name>`
    async fn save_notifier(
        &self,
        name: &str,
        config: &NotifierConfig,
        mode: SaveMode,
    ) -> Result<(), DatabaseError>;

    /// Get one notifier configuration
    async fn get_notifier(&self, name: &str) -> Result<NotifierConfig, DatabaseError>;

    /// All notifier configurations, ordered by name. Entries that are
    /// incomplete or fail to decode are logged and skipped.
    async fn list_notifiers(&self) -> Result<Vec<(String, NotifierConfig)>, DatabaseError>;

    /// Delete a notifier and remove it from every monitor that references it
    async fn delete_notifier(&self, name: &str) -> Result<(), DatabaseError>;
}

/// sled-backed database implementation
#[derive(Debug, Clone)]
pub struct DatabaseImpl {
    store: Arc<Store>,
}

impl DatabaseImpl {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run a store operation on the blocking pool; sled calls may hit disk.
    async fn blocking<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Store) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

fn decode_statuses(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<Status>, DatabaseError> {
    entries
        .into_iter()
        .map(|(_, value)| serde_json::from_slice(&value).map_err(DatabaseError::from))
        .collect()
}

fn decode_notifier(kind: &[u8], data: &[u8]) -> Result<NotifierConfig, DatabaseError> {
    NotifierConfig::decode(&String::from_utf8_lossy(kind), data)
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn get_monitor(&self, name: &str) -> Result<Monitor, DatabaseError> {
        let name = name.to_string();
        self.blocking(move |store| {
            let value = store.get(&[MONITORS], &name)?;
            Ok(serde_json::from_slice(&value)?)
        })
        .await
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>, DatabaseError> {
        self.blocking(|store| {
            let entries = match store.scan(&[MONITORS], None, None) {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            entries
                .into_iter()
                .map(|(_, value)| serde_json::from_slice(&value).map_err(DatabaseError::from))
                .collect()
        })
        .await
    }

    async fn save_monitor(&self, monitor: &Monitor, mode: SaveMode) -> Result<(), DatabaseError> {
        let bytes = serde_json::to_vec(monitor)?;
        let name = monitor.name.clone();
        self.blocking(move |store| {
            store.update(|tx| {
                let exists = tx.contains(&[MONITORS], &name)?;
                match mode {
                    SaveMode::Create if exists => {
                        return Err(DatabaseError::conflict(format!("{MONITORS}/{name}")));
                    }
                    SaveMode::Update if !exists => {
                        return Err(DatabaseError::not_found(format!("{MONITORS}/{name}")));
                    }
                    _ => {}
                }
                tx.put(&[MONITORS], &name, &bytes)
            })
        })
        .await
    }

    async fn delete_monitor(&self, name: &str) -> Result<(), DatabaseError> {
        let name = name.to_string();
        self.blocking(move |store| {
            store.update(|tx| {
                if !tx.delete(&[MONITORS], &name)? {
                    return Err(DatabaseError::not_found(format!("{MONITORS}/{name}")));
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_status(&self, name: &str) -> Result<Status, DatabaseError> {
        let name = name.to_string();
        self.blocking(move |store| {
            let value = store.get(&[STATUS], &name)?;
            Ok(serde_json::from_slice(&value)?)
        })
        .await
    }

    async fn put_status(&self, status: &Status) -> Result<(), DatabaseError> {
        let bytes = serde_json::to_vec(status)?;
        let name = status.site.clone();
        self.blocking(move |store| store.put(&[STATUS], &name, &bytes)).await
    }

    async fn append_history(&self, status: &Status) -> Result<(), DatabaseError> {
        let bytes = serde_json::to_vec(status)?;
        let name = status.site.clone();
        let key = timestamp_key(&status.timestamp);
        self.blocking(move |store| store.put(&[HISTORY, &name], &key, &bytes)).await
    }

    async fn history(
        &self,
        name: &str,
        lower: Option<DateTime<Utc>>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<Status>, DatabaseError> {
        let name = name.to_string();
        let lower = lower.map(|at| timestamp_key(&at));
        let upper = timestamp_key(&upper);
        self.blocking(move |store| {
            decode_statuses(store.scan(&[HISTORY, &name], lower.as_deref(), Some(&upper))?)
        })
        .await
    }

    async fn delete_history(&self, name: &str) -> Result<(), DatabaseError> {
        let name = name.to_string();
        self.blocking(move |store| {
            store.update(|tx| {
                if tx.bucket_exists(&[HISTORY, &name])? {
                    tx.delete_bucket(&[HISTORY, &name])?;
                }
                tx.delete(&[STATUS], &name)?;
                Ok(())
            })
        })
        .await
    }

    async fn purge_history(&self, name: &str, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let name = name.to_string();
        let cutoff = timestamp_key(&cutoff);
        self.blocking(move |store| {
            store.update(|tx| {
                let doomed = tx.scan(&[HISTORY, &name], None, Some(&cutoff))?;
                for (key, _) in &doomed {
                    tx.delete(&[HISTORY, &name], key)?;
                }
                Ok(doomed.len())
            })
        })
        .await
    }

    async fn history_sites(&self) -> Result<Vec<String>, DatabaseError> {
        self.blocking(|store| {
            if !store.bucket_exists(&[HISTORY])? {
                return Ok(Vec::new());
            }
            store.buckets(&[HISTORY])
        })
        .await
    }

    async fn save_notifier(
        &self,
        name: &str,
        config: &NotifierConfig,
        mode: SaveMode,
    ) -> Result<(), DatabaseError> {
        let name = name.to_string();
        let kind = config.kind().to_string();
        let data = config.encode()?;
        self.blocking(move |store| {
            store.update(|tx| {
                let exists = tx.bucket_exists(&[NOTIFY, &name])?;
                match mode {
                    SaveMode::Create if exists => {
                        return Err(DatabaseError::conflict(format!("{NOTIFY}/{name}")));
                    }
                    SaveMode::Update if !exists => {
                        return Err(DatabaseError::not_found(format!("{NOTIFY}/{name}")));
                    }
                    _ => {}
                }
                tx.put(&[NOTIFY, &name], NOTIFY_TYPE, kind.as_bytes())?;
                tx.put(&[NOTIFY, &name], NOTIFY_DATA, &data)
            })
        })
        .await
    }

    async fn get_notifier(&self, name: &str) -> Result<NotifierConfig, DatabaseError> {
        let name = name.to_string();
        self.blocking(move |store| {
            let kind = store.get(&[NOTIFY, &name], NOTIFY_TYPE)?;
            let data = store.get(&[NOTIFY, &name], NOTIFY_DATA)?;
            decode_notifier(&kind, &data)
        })
        .await
    }

    async fn list_notifiers(&self) -> Result<Vec<(String, NotifierConfig)>, DatabaseError> {
        self.blocking(|store| {
            if !store.bucket_exists(&[NOTIFY])? {
                return Ok(Vec::new());
            }
            let mut names = store.buckets(&[NOTIFY])?;
            names.sort();

            let mut notifiers = Vec::with_capacity(names.len());
            for name in names {
                let decoded = store
                    .get(&[NOTIFY, &name], NOTIFY_TYPE)
                    .and_then(|kind| Ok((kind, store.get(&[NOTIFY, &name], NOTIFY_DATA)?)))
                    .and_then(|(kind, data)| decode_notifier(&kind, &data));
                match decoded {
                    Ok(config) => notifiers.push((name, config)),
                    Err(e @ (DatabaseError::NotFound { .. } | DatabaseError::Serialization(_))) => {
                        warn!(notifier = %name, error = %e, "skipping unreadable notifier");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(notifiers)
        })
        .await
    }

    async fn delete_notifier(&self, name: &str) -> Result<(), DatabaseError> {
        let name = name.to_string();
        self.blocking(move |store| {
            store.update(|tx| {
                tx.delete_bucket(&[NOTIFY, &name])?;

                let monitors = match tx.scan(&[MONITORS], None, None) {
                    Ok(entries) => entries,
                    Err(e) if e.is_not_found() => Vec::new(),
                    Err(e) => return Err(e),
                };
                for (key, value) in monitors {
                    let mut monitor: Monitor = serde_json::from_slice(&value)?;
                    let before = monitor.notifiers.len();
                    monitor.notifiers.retain(|n| n != &name);
                    if monitor.notifiers.len() != before {
                        tx.put(&[MONITORS], &key, &serde_json::to_vec(&monitor)?)?;
                    }
                }
                Ok(())
            })
        })
        .await
    }
}
