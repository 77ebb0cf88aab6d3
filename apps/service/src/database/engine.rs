//! Hierarchical bucket storage on top of a single sled tree.
//!
//! Buckets are addressed by a path of names (`["history", "example"]`). Every
//! bucket along a path has a marker record, so an empty bucket still exists and
//! deleting a bucket is a prefix removal. Entries inside a bucket are stored
//! under the bucket prefix followed by a key tag, which keeps a bucket's own
//! keys contiguous and in byte order. Time-series keys are fixed-width
//! timestamps (see [`super::keys`]), so a range scan is a chronological scan.
//!
//! Writes go through [`Store::update`]: a single writer at a time builds a
//! batch and applies it atomically, then flushes to disk before returning.
//! Readers never take the writer lock and only ever observe applied batches.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sled::{Batch, Db};
use tracing::{info, warn};

use super::error::DatabaseError;

const BUCKET_TAG: u8 = b'B';
const KEY_TAG: u8 = b'K';
const TERMINATOR: u8 = 0;

/// Upper bound for the open backoff, however many attempts are configured.
const MAX_OPEN_BACKOFF: Duration = Duration::from_secs(8);

/// Embedded ordered key-value store with bucket namespacing.
pub struct Store {
    db: Db,
    writer: Mutex<()>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the store at `path` with a single attempt.
    ///
    /// A store dropped moments ago may still hold the file lock; reopen paths
    /// go through [`Store::open_with_retry`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sled::Error::from)?;
            }
        }
        let db = sled::open(path)?;
        Ok(Self { db, writer: Mutex::new(()) })
    }

    /// Open the store, retrying while the file is held by another process.
    ///
    /// I/O failures (which is how a held file lock surfaces) are retried up to
    /// `attempts` times with a doubling pause starting at `backoff`. Anything
    /// else fails immediately.
    pub async fn open_with_retry(
        path: impl AsRef<Path>,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let attempts = attempts.max(1);
        let mut pause = backoff;
        let mut attempt = 1;

        loop {
            match Self::open(path) {
                Ok(store) => {
                    info!(path = %path.display(), "opened database");
                    return Ok(store);
                }
                Err(DatabaseError::Sled(source @ sled::Error::Io(_))) if attempt < attempts => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %source,
                        "database unavailable, retrying in {:?}",
                        pause
                    );
                    tokio::time::sleep(pause).await;
                    pause = (pause * 2).min(MAX_OPEN_BACKOFF);
                    attempt += 1;
                }
                Err(DatabaseError::Sled(source @ sled::Error::Io(_))) => {
                    return Err(DatabaseError::Locked { attempts, source });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read a single value.
    pub fn get(&self, path: &[&str], key: &str) -> Result<Vec<u8>, DatabaseError> {
        let prefix = bucket_prefix(path)?;
        if self.db.get(&prefix)?.is_none() {
            return Err(DatabaseError::not_found(display_path(path)));
        }
        self.db
            .get(entry_key(&prefix, key))?
            .map(|value| value.to_vec())
            .ok_or_else(|| DatabaseError::not_found(display_entry(path, key)))
    }

    /// True when `path` names an existing bucket.
    pub fn bucket_exists(&self, path: &[&str]) -> Result<bool, DatabaseError> {
        Ok(self.db.contains_key(bucket_prefix(path)?)?)
    }

    /// Ordered scan of the entries of one bucket, bounds inclusive.
    ///
    /// `None` leaves that side of the range open. Nested buckets are not part
    /// of the result.
    pub fn scan(
        &self,
        path: &[&str],
        lower: Option<&str>,
        upper: Option<&str>,
    ) -> Result<Vec<(String, Vec<u8>)>, DatabaseError> {
        scan_bucket(&self.db, path, lower, upper)
    }

    /// Names of the buckets nested directly below `path` (the root when empty).
    pub fn buckets(&self, path: &[&str]) -> Result<Vec<String>, DatabaseError> {
        let mut prefix = if path.is_empty() { Vec::new() } else { bucket_prefix(path)? };
        prefix.push(BUCKET_TAG);

        let mut names = Vec::new();
        for item in self.db.scan_prefix(&prefix) {
            let (key, _) = item?;
            if let Some((&TERMINATOR, name)) = key[prefix.len()..].split_last() {
                if !name.contains(&TERMINATOR) {
                    names.push(String::from_utf8_lossy(name).into_owned());
                }
            }
        }
        Ok(names)
    }

    /// Upsert one value, creating any missing bucket along `path`.
    pub fn put(&self, path: &[&str], key: &str, value: &[u8]) -> Result<(), DatabaseError> {
        self.update(|tx| tx.put(path, key, value))
    }

    /// Remove one value; removing an absent key is not an error.
    pub fn delete(&self, path: &[&str], key: &str) -> Result<bool, DatabaseError> {
        self.update(|tx| tx.delete(path, key))
    }

    /// Remove a bucket with everything nested below it.
    pub fn delete_bucket(&self, path: &[&str]) -> Result<usize, DatabaseError> {
        self.update(|tx| tx.delete_bucket(path))
    }

    /// Force everything written so far to disk.
    pub fn flush(&self) -> Result<(), DatabaseError> {
        self.db.flush()?;
        Ok(())
    }

    /// Run a write transaction.
    ///
    /// The closure's mutations are applied as one atomic batch and flushed to
    /// disk. If the closure fails nothing is applied.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut WriteTx<'_>) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tx = WriteTx { db: &self.db, pending: BTreeMap::new() };
        let output = f(&mut tx)?;

        if !tx.pending.is_empty() {
            let mut batch = Batch::default();
            for (key, value) in tx.pending {
                match value {
                    Some(value) => batch.insert(key, value),
                    None => batch.remove(key),
                }
            }
            self.db.apply_batch(batch)?;
            self.db.flush()?;
        }

        Ok(output)
    }
}

/// Pending mutations of one [`Store::update`] call.
///
/// Reads through the transaction see its own pending writes. Scans only see
/// what was committed before the transaction started.
pub struct WriteTx<'a> {
    db: &'a Db,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteTx<'_> {
    fn lookup(&self, raw: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        match self.pending.get(raw) {
            Some(value) => Ok(value.clone()),
            None => Ok(self.db.get(raw)?.map(|value| value.to_vec())),
        }
    }

    pub fn bucket_exists(&self, path: &[&str]) -> Result<bool, DatabaseError> {
        Ok(self.lookup(&bucket_prefix(path)?)?.is_some())
    }

    pub fn get(&self, path: &[&str], key: &str) -> Result<Vec<u8>, DatabaseError> {
        let prefix = bucket_prefix(path)?;
        if self.lookup(&prefix)?.is_none() {
            return Err(DatabaseError::not_found(display_path(path)));
        }
        self.lookup(&entry_key(&prefix, key))?
            .ok_or_else(|| DatabaseError::not_found(display_entry(path, key)))
    }

    pub fn contains(&self, path: &[&str], key: &str) -> Result<bool, DatabaseError> {
        match self.get(path, key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create `path` and every bucket above it. Returns true if anything was created.
    pub fn create_bucket(&mut self, path: &[&str]) -> Result<bool, DatabaseError> {
        let prefix = bucket_prefix(path)?;

        let mut created = false;
        let mut marker = Vec::with_capacity(prefix.len());
        for name in path {
            push_segment(&mut marker, name);
            if self.lookup(&marker)?.is_none() {
                self.pending.insert(marker.clone(), Some(Vec::new()));
                created = true;
            }
        }
        Ok(created)
    }

    pub fn put(&mut self, path: &[&str], key: &str, value: &[u8]) -> Result<(), DatabaseError> {
        self.create_bucket(path)?;
        let prefix = bucket_prefix(path)?;
        self.pending.insert(entry_key(&prefix, key), Some(value.to_vec()));
        Ok(())
    }

    pub fn delete(&mut self, path: &[&str], key: &str) -> Result<bool, DatabaseError> {
        let raw = entry_key(&bucket_prefix(path)?, key);
        let existed = self.lookup(&raw)?.is_some();
        if existed {
            self.pending.insert(raw, None);
        }
        Ok(existed)
    }

    /// Delete a bucket and all descendants. Returns the number of records removed.
    pub fn delete_bucket(&mut self, path: &[&str]) -> Result<usize, DatabaseError> {
        let prefix = bucket_prefix(path)?;
        if self.lookup(&prefix)?.is_none() {
            return Err(DatabaseError::not_found(display_path(path)));
        }

        let mut doomed = Vec::new();
        for item in self.db.scan_prefix(&prefix) {
            let (key, _) = item?;
            doomed.push(key.to_vec());
        }
        for (key, value) in self.pending.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if value.is_some() {
                doomed.push(key.clone());
            }
        }

        let mut removed = 0;
        for key in doomed {
            if self.pending.insert(key, None) != Some(None) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Committed entries of a bucket, bounds inclusive.
    pub fn scan(
        &self,
        path: &[&str],
        lower: Option<&str>,
        upper: Option<&str>,
    ) -> Result<Vec<(String, Vec<u8>)>, DatabaseError> {
        scan_bucket(self.db, path, lower, upper)
    }
}

fn scan_bucket(
    db: &Db,
    path: &[&str],
    lower: Option<&str>,
    upper: Option<&str>,
) -> Result<Vec<(String, Vec<u8>)>, DatabaseError> {
    let prefix = bucket_prefix(path)?;
    if db.get(&prefix)?.is_none() {
        return Err(DatabaseError::not_found(display_path(path)));
    }

    let start = entry_key(&prefix, lower.unwrap_or(""));
    let end = match upper {
        Some(upper) => Bound::Included(entry_key(&prefix, upper)),
        None => {
            let mut end = prefix.clone();
            end.push(KEY_TAG + 1);
            Bound::Excluded(end)
        }
    };

    let offset = prefix.len() + 1;
    db.range::<Vec<u8>, _>((Bound::Included(start), end))
        .map(|item| {
            let (key, value) = item?;
            Ok((String::from_utf8_lossy(&key[offset..]).into_owned(), value.to_vec()))
        })
        .collect()
}

fn push_segment(out: &mut Vec<u8>, name: &str) {
    out.push(BUCKET_TAG);
    out.extend_from_slice(name.as_bytes());
    out.push(TERMINATOR);
}

fn bucket_prefix(path: &[&str]) -> Result<Vec<u8>, DatabaseError> {
    if path.is_empty() {
        return Err(DatabaseError::InvalidPath("empty path".into()));
    }
    let mut prefix = Vec::new();
    for name in path {
        if name.is_empty() || name.as_bytes().contains(&TERMINATOR) {
            return Err(DatabaseError::InvalidPath(display_path(path)));
        }
        push_segment(&mut prefix, name);
    }
    Ok(prefix)
}

fn entry_key(prefix: &[u8], key: &str) -> Vec<u8> {
    let mut raw = Vec::with_capacity(prefix.len() + 1 + key.len());
    raw.extend_from_slice(prefix);
    raw.push(KEY_TAG);
    raw.extend_from_slice(key.as_bytes());
    raw
}

fn display_path(path: &[&str]) -> String {
    path.join("/")
}

fn display_entry(path: &[&str], key: &str) -> String {
    format!("{}/{}", display_path(path), key)
}
