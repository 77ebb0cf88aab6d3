use thiserror::Error;

/// Errors surfaced by the storage engine and the repository built on it.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("already exists: {path}")]
    Conflict { path: String },

    #[error("invalid bucket path: {0}")]
    InvalidPath(String),

    #[error("database file still locked after {attempts} attempts: {source}")]
    Locked {
        attempts: u32,
        #[source]
        source: sled::Error,
    },

    #[error("storage failure: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DatabaseError {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn conflict(path: impl Into<String>) -> Self {
        Self::Conflict { path: path.into() }
    }

    /// True when the error is a missing bucket or key rather than an I/O failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
