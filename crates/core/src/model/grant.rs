use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GrantError;
use crate::model::SessionId;

/// Lifecycle position of a grant. Ordered `Pending < Active < Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Pending,
    Active,
    #[serde(alias = "ended")]
    Expired,
}

impl GrantStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    /// Moves forward to `to`. Staying put is allowed; going back is not.
    ///
    /// # Errors
    ///
    /// Returns `GrantError::StatusRegression` if `to` precedes `self`.
    pub fn advance(self, to: GrantStatus) -> Result<GrantStatus, GrantError> {
        if to < self {
            return Err(GrantError::StatusRegression { from: self, to });
        }
        Ok(to)
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical session record as reported by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedGrant {
    pub id: SessionId,
    #[serde(default)]
    pub minutes_allowed: i64,
    pub status: GrantStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// The single time-bounded access grant held by the client.
///
/// `local_start_at`/`local_end_at` are stamped once, when the client learns
/// of activation, and are never recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    session_id: SessionId,
    minutes_allowed: i64,
    status: GrantStatus,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    local_start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    local_end_at: Option<DateTime<Utc>>,
}

impl SessionGrant {
    /// A freshly selected grant awaiting activation.
    #[must_use]
    pub fn pending(session_id: SessionId, minutes_allowed: i64) -> Self {
        Self {
            session_id,
            minutes_allowed,
            status: GrantStatus::Pending,
            started_at: None,
            local_start_at: None,
            local_end_at: None,
        }
    }

    /// Rehydrate a grant from any persisted shape, without validation.
    #[must_use]
    pub fn from_persisted(
        session_id: SessionId,
        minutes_allowed: i64,
        status: GrantStatus,
        started_at: Option<DateTime<Utc>>,
        local_start_at: Option<DateTime<Utc>>,
        local_end_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            session_id,
            minutes_allowed,
            status,
            started_at,
            local_start_at,
            local_end_at,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn minutes_allowed(&self) -> i64 {
        self.minutes_allowed
    }

    #[must_use]
    pub fn status(&self) -> GrantStatus {
        self.status
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn local_start_at(&self) -> Option<DateTime<Utc>> {
        self.local_start_at
    }

    #[must_use]
    pub fn local_end_at(&self) -> Option<DateTime<Utc>> {
        self.local_end_at
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == GrantStatus::Pending
    }

    /// False for zero or negative budgets.
    #[must_use]
    pub fn has_valid_budget(&self) -> bool {
        self.minutes_allowed > 0
    }

    /// The locally stamped `(start, end)` window.
    ///
    /// Always `None` while pending, even if a stale window was persisted.
    #[must_use]
    pub fn local_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if self.is_pending() {
            return None;
        }
        Some((self.local_start_at?, self.local_end_at?))
    }

    /// Apply the authority's confirmation and stamp the local window at `now`.
    ///
    /// The budget comes from the authority; the locally selected budget is
    /// only used when the authority echoes none.
    ///
    /// # Errors
    ///
    /// Returns `GrantError::NotPending` if this grant already left `pending`,
    /// `GrantError::NotConfirmed` if the authority did not report `active`,
    /// `GrantError::SessionMismatch` if the ids disagree, and
    /// `GrantError::InvalidBudget` for non-positive or unrepresentable budgets.
    pub fn activate(
        &self,
        confirmed: &ConfirmedGrant,
        now: DateTime<Utc>,
    ) -> Result<SessionGrant, GrantError> {
        if !self.is_pending() {
            return Err(GrantError::NotPending {
                status: self.status,
            });
        }
        if confirmed.status != GrantStatus::Active {
            return Err(GrantError::NotConfirmed {
                status: confirmed.status,
            });
        }
        if confirmed.id != self.session_id {
            return Err(GrantError::SessionMismatch {
                expected: self.session_id.clone(),
                actual: confirmed.id.clone(),
            });
        }

        let minutes = if confirmed.minutes_allowed > 0 {
            confirmed.minutes_allowed
        } else {
            self.minutes_allowed
        };
        let end = window_end(now, minutes)?;

        Ok(SessionGrant {
            session_id: self.session_id.clone(),
            minutes_allowed: minutes,
            status: self.status.advance(GrantStatus::Active)?,
            started_at: confirmed.started_at,
            local_start_at: Some(now),
            local_end_at: Some(end),
        })
    }

    /// Rebuild a grant from the authority's record alone.
    ///
    /// Active sessions are windowed from the authority's `started_at`, so a
    /// restored grant never gets more time than the session had left. When
    /// the authority reports no start instant the window opens at `now`.
    ///
    /// # Errors
    ///
    /// Returns `GrantError::InvalidBudget` for an active record whose budget
    /// is non-positive or unrepresentable.
    pub fn restore(
        confirmed: &ConfirmedGrant,
        now: DateTime<Utc>,
    ) -> Result<SessionGrant, GrantError> {
        let mut grant = Self::pending(confirmed.id.clone(), confirmed.minutes_allowed);
        grant.started_at = confirmed.started_at;
        match confirmed.status {
            GrantStatus::Pending => Ok(grant),
            GrantStatus::Expired => Ok(grant.expire()),
            GrantStatus::Active => {
                let start = confirmed.started_at.unwrap_or(now);
                grant.local_end_at = Some(window_end(start, confirmed.minutes_allowed)?);
                grant.local_start_at = Some(start);
                grant.status = GrantStatus::Active;
                Ok(grant)
            }
        }
    }

    /// The same grant, logically expired. Idempotent.
    #[must_use]
    pub fn expire(&self) -> SessionGrant {
        SessionGrant {
            status: GrantStatus::Expired,
            ..self.clone()
        }
    }
}

fn window_end(start: DateTime<Utc>, minutes: i64) -> Result<DateTime<Utc>, GrantError> {
    if minutes <= 0 {
        return Err(GrantError::InvalidBudget { minutes });
    }
    Duration::try_minutes(minutes)
        .and_then(|budget| start.checked_add_signed(budget))
        .ok_or(GrantError::InvalidBudget { minutes })
}
