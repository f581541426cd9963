use std::sync::Arc;

use learn_core::model::{Language, SessionGrant};
use storage::SessionStore;
use tracing::{info, warn};

use crate::error::{BlockReason, SelectionError, SessionClientError};
use crate::session_client::SessionAuthority;

/// Session lengths offered to students, in minutes.
pub const OFFERED_MINUTES: [i64; 4] = [5, 10, 15, 20];

/// Result of picking a session duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// A new pending grant was created and stored.
    Created(SessionGrant),
    /// The authority still has a live session and one is stored locally;
    /// carry on with it instead of starting over.
    Resume(SessionGrant),
}

impl SelectionOutcome {
    #[must_use]
    pub fn grant(&self) -> &SessionGrant {
        match self {
            Self::Created(grant) | Self::Resume(grant) => grant,
        }
    }
}

/// Creates pending grants when a student picks how long to study.
#[derive(Clone)]
pub struct SelectionService {
    store: SessionStore,
    authority: Arc<dyn SessionAuthority>,
}

impl SelectionService {
    #[must_use]
    pub fn new(store: SessionStore, authority: Arc<dyn SessionAuthority>) -> Self {
        Self { store, authority }
    }

    /// Ask the authority for a new session and store it as the current grant.
    ///
    /// # Errors
    ///
    /// Returns `SelectionError::InvalidMinutes` for durations that are not
    /// offered, `SelectionError::Blocked` when the authority refuses and no
    /// local grant can be resumed, and client or storage errors otherwise.
    pub async fn select(
        &self,
        minutes: i64,
        mood: Option<&str>,
        language: Language,
    ) -> Result<SelectionOutcome, SelectionError> {
        if !OFFERED_MINUTES.contains(&minutes) {
            return Err(SelectionError::InvalidMinutes { minutes });
        }

        match self.authority.create(minutes, mood, language).await {
            Ok(record) => {
                let budget = if record.minutes_allowed > 0 {
                    record.minutes_allowed
                } else {
                    minutes
                };
                let grant = SessionGrant::pending(record.id, budget);
                self.store.write(&grant).await?;
                info!(session_id = %grant.session_id(), minutes = budget, "session grant selected");
                Ok(SelectionOutcome::Created(grant))
            }
            Err(SessionClientError::Blocked(BlockReason::SessionActive)) => {
                match self.store.read().await {
                    Some(existing) => Ok(SelectionOutcome::Resume(existing)),
                    None => Err(SelectionError::Blocked(BlockReason::SessionActive)),
                }
            }
            Err(SessionClientError::Blocked(reason)) => {
                if reason == BlockReason::SessionRecent {
                    if let Err(err) = self.store.clear().await {
                        warn!(error = %err, "could not clear stale session grant");
                    }
                }
                Err(SelectionError::Blocked(reason))
            }
            Err(err) => Err(SelectionError::Client(err)),
        }
    }
}
