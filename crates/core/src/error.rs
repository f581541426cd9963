use thiserror::Error;

use crate::model::{GrantStatus, SessionId};

/// Errors raised by grant lifecycle transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GrantError {
    #[error("grant status cannot move from {from} back to {to}")]
    StatusRegression { from: GrantStatus, to: GrantStatus },

    #[error("grant is {status}, only pending grants can be activated")]
    NotPending { status: GrantStatus },

    #[error("authority reported {status} instead of active")]
    NotConfirmed { status: GrantStatus },

    #[error("authority confirmed session {actual}, expected {expected}")]
    SessionMismatch {
        expected: SessionId,
        actual: SessionId,
    },

    #[error("invalid time budget: {minutes} minutes")]
    InvalidBudget { minutes: i64 },
}
