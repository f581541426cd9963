//! Shared error types for the services crate.

use std::fmt;

use thiserror::Error;

use learn_core::GrantError;
use storage::StorageError;
use storage::sqlite::SqliteInitError;

/// Why the authority refused to create or activate a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// Another session is still pending or active.
    SessionActive,
    /// A session was already started today.
    SessionRecent,
    Other(String),
}

impl BlockReason {
    #[must_use]
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some("session_active") => Self::SessionActive,
            Some("session_recent") => Self::SessionRecent,
            Some(other) => Self::Other(other.to_owned()),
            None => Self::Other("unspecified".to_owned()),
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionActive => f.write_str("session_active"),
            Self::SessionRecent => f.write_str("session_recent"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Errors emitted by `SessionAuthority` implementations.
///
/// Any of these returned from `activate` means the activation failed and the
/// local grant must stay pending.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionClientError {
    #[error("authority blocked the request: {0}")]
    Blocked(BlockReason),
    #[error("authority request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("authority returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by `SelectionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SelectionError {
    #[error("{minutes} minutes is not an offered duration")]
    InvalidMinutes { minutes: i64 },
    #[error("cannot start a new session: {0}")]
    Blocked(BlockReason),
    #[error(transparent)]
    Client(SessionClientError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SessionRestore`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RestoreError {
    #[error(transparent)]
    Client(#[from] SessionClientError),
    #[error("authority record cannot be restored: {0}")]
    Grant(#[from] GrantError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `DashboardClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DashboardError {
    #[error("dashboard request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
