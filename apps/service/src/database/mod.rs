/// Database abstraction layer
///
/// This module provides the bucketed key-value store and the typed
/// repository the scheduler, change detector and admin boundary share.

pub mod engine;
pub mod error;
pub mod keys;
pub mod migrations;
pub mod models;
pub mod repository;

pub use engine::Store;
pub use error::DatabaseError;
pub use repository::{Database, DatabaseImpl, SaveMode};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Open the store with bounded retry and bring its layout up to date
pub async fn open_database(
    path: impl AsRef<Path>,
    attempts: u32,
    backoff: Duration,
) -> Result<DatabaseImpl, DatabaseError> {
    let store = Store::open_with_retry(path, attempts, backoff).await?;
    let store = Arc::new(store);

    let migrating = Arc::clone(&store);
    tokio::task::spawn_blocking(move || migrations::run_migrations(&migrating)).await??;

    Ok(DatabaseImpl::new(store))
}
