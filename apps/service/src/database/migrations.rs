use tracing::info;

use super::engine::Store;
use super::error::DatabaseError;
use super::repository::{HISTORY, META, MONITORS, NOTIFY, STATUS};

/// Layout version - increment when the bucket layout changes
const LAYOUT_VERSION: u32 = 1;

const LAYOUT_VERSION_KEY: &str = "layout_version";

/// Bring the bucket layout up to date.
///
/// A fresh file and an existing one end up with the same top-level buckets,
/// so readers never have to special-case a brand new store.
pub fn run_migrations(store: &Store) -> Result<(), DatabaseError> {
    let current = current_version(store)?;

    if current >= LAYOUT_VERSION {
        info!("Database layout is up to date (version {})", current);
        return Ok(());
    }

    info!("Migrating database layout from version {} to {}", current, LAYOUT_VERSION);

    store.update(|tx| {
        if current < 1 {
            for bucket in [MONITORS, STATUS, HISTORY, NOTIFY] {
                tx.create_bucket(&[bucket])?;
            }
        }
        tx.put(&[META], LAYOUT_VERSION_KEY, LAYOUT_VERSION.to_string().as_bytes())
    })?;

    info!("Database layout migrated (now at version {})", LAYOUT_VERSION);
    Ok(())
}

/// Layout version recorded in the store, 0 when none was recorded yet
fn current_version(store: &Store) -> Result<u32, DatabaseError> {
    match store.get(&[META], LAYOUT_VERSION_KEY) {
        Ok(raw) => Ok(String::from_utf8_lossy(&raw).trim().parse().unwrap_or(0)),
        Err(e) if e.is_not_found() => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_store_gets_all_buckets() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("uptime.db")).unwrap();

        run_migrations(&store).unwrap();

        for bucket in [MONITORS, STATUS, HISTORY, NOTIFY] {
            assert!(store.bucket_exists(&[bucket]).unwrap(), "{bucket} missing");
        }
        assert_eq!(current_version(&store).unwrap(), LAYOUT_VERSION);
        assert!(store.scan(&[MONITORS], None, None).unwrap().is_empty());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("uptime.db")).unwrap();
        store.put(&[MONITORS], "example", b"{}").unwrap();

        run_migrations(&store).unwrap();
        run_migrations(&store).unwrap();

        assert_eq!(store.get(&[MONITORS], "example").unwrap(), b"{}");
    }
}
