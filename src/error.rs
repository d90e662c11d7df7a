//! Error types for the local store and the sync core.

use thiserror::Error;

/// Local store failures. Always fatal to the operation that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to open local store at {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: rusqlite::Error,
  },

  #[error("failed to create store directory: {0}")]
  Io(#[from] std::io::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to (de)serialize stored value: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("corrupt store row: {0}")]
  Corrupt(String),

  #[error("store lock poisoned")]
  LockPoisoned,

  #[error("invalid stored timestamp '{0}'")]
  Timestamp(String),

  #[error("could not determine data directory")]
  NoDataDir,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the read path, the write path and the replay engine.
#[derive(Debug, Error)]
pub enum SyncError {
  /// The request never produced an HTTP response (offline, DNS, timeout).
  #[error("network error: {0}")]
  Network(String),

  #[error("authentication rejected ({status})")]
  Auth { status: u16 },

  #[error("request rejected ({status}): {body}")]
  Client { status: u16, body: String },

  #[error("server error ({status}): {body}")]
  Server { status: u16, body: String },

  #[error("data unavailable offline: nothing cached for '{key}'")]
  NotFoundInCache { key: String },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to decode payload: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid request: {0}")]
  Protocol(String),
}

impl SyncError {
  /// Build the error matching a non-success HTTP status.
  pub fn from_status(status: u16, body: String) -> Self {
    match status {
      401 | 403 => Self::Auth { status },
      400..=499 => Self::Client { status, body },
      _ => Self::Server { status, body },
    }
  }

  pub fn is_auth(&self) -> bool {
    matches!(self, Self::Auth { .. })
  }

  /// Failures worth retrying later: no response at all, or a 5xx.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Network(_) | Self::Server { .. })
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Auth { status } | Self::Client { status, .. } | Self::Server { status, .. } => {
        Some(*status)
      }
      _ => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, SyncError>;
