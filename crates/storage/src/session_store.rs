use std::sync::Arc;

use learn_core::model::SessionGrant;
use tracing::warn;

use crate::repository::{SlotRepository, StorageError};

/// Well-known slot holding the current grant.
pub const SESSION_SLOT: &str = "hmh_session";

/// Durable home of the single current `SessionGrant`.
///
/// Reads fail soft: a missing, unreadable or unparsable record is reported
/// as absent. Writes replace the whole record, so the last writer wins.
#[derive(Clone)]
pub struct SessionStore {
    slots: Arc<dyn SlotRepository>,
    key: &'static str,
}

impl SessionStore {
    #[must_use]
    pub fn new(slots: Arc<dyn SlotRepository>) -> Self {
        Self {
            slots,
            key: SESSION_SLOT,
        }
    }

    /// Same store under a different slot key.
    #[must_use]
    pub fn with_key(mut self, key: &'static str) -> Self {
        self.key = key;
        self
    }

    /// The current grant, or `None` if there is no usable record.
    pub async fn read(&self) -> Option<SessionGrant> {
        let raw = match self.slots.get_slot(self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(slot = self.key, error = %err, "session slot unreadable");
                return None;
            }
        };

        match serde_json::from_str::<SessionGrant>(&raw) {
            Ok(grant) => Some(grant),
            Err(err) => {
                warn!(slot = self.key, error = %err, "session slot is corrupt, treating as absent");
                None
            }
        }
    }

    /// Replace the stored grant.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the grant cannot be encoded or stored.
    pub async fn write(&self, grant: &SessionGrant) -> Result<(), StorageError> {
        let text = serde_json::to_string(grant)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.slots.put_slot(self.key, &text).await
    }

    /// Forget the stored grant.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the slot cannot be cleared.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.slots.clear_slot(self.key).await
    }
}
