//! Rebuilds the local grant from the authority's canonical record.
//!
//! Used when the local copy is missing or unreadable (new device, cleared
//! storage, corrupt slot) so a session that is still live on the authority
//! can be resumed instead of forcing a fresh selection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use learn_core::Clock;
use learn_core::model::{GrantStatus, SessionGrant};
use storage::SessionStore;
use tracing::{debug, info};

use crate::error::RestoreError;
use crate::session_client::SessionAuthority;

#[derive(Clone)]
pub struct SessionRestore {
    clock: Clock,
    store: SessionStore,
    authority: Arc<dyn SessionAuthority>,
}

impl SessionRestore {
    #[must_use]
    pub fn new(clock: Clock, store: SessionStore, authority: Arc<dyn SessionAuthority>) -> Self {
        Self {
            clock,
            store,
            authority,
        }
    }

    /// Fetch the authority's current session and reconcile it into the store.
    ///
    /// Returns the grant the store holds afterwards, or `None` when the
    /// authority has nothing to resume.
    ///
    /// # Errors
    ///
    /// Returns `RestoreError` if the authority cannot be asked, its record
    /// is unusable, or the recovered grant cannot be stored.
    pub async fn restore(&self) -> Result<Option<SessionGrant>, RestoreError> {
        self.restore_with(None).await
    }

    /// Same as [`SessionRestore::restore`], with the window anchored at `now`
    /// when the authority reports no start instant.
    ///
    /// # Errors
    ///
    /// See [`SessionRestore::restore`].
    pub async fn restore_at(&self, now: DateTime<Utc>) -> Result<Option<SessionGrant>, RestoreError> {
        self.restore_with(Some(now)).await
    }

    pub(crate) async fn restore_with(
        &self,
        pinned: Option<DateTime<Utc>>,
    ) -> Result<Option<SessionGrant>, RestoreError> {
        let Some(record) = self.authority.current().await? else {
            debug!("authority has no session to restore");
            return Ok(None);
        };
        let now = pinned.unwrap_or_else(|| self.clock.now());
        let recovered = SessionGrant::restore(&record, now)?;

        // Read after the network call so a grant written meanwhile is seen.
        let local = self.store.read().await;
        match reconcile(local.as_ref(), recovered) {
            Reconciled::Keep(grant) => Ok(Some(grant)),
            Reconciled::Write(grant) => {
                self.store.write(&grant).await?;
                info!(
                    session_id = %grant.session_id(),
                    status = %grant.status(),
                    "session grant restored from authority"
                );
                Ok(Some(grant))
            }
            Reconciled::Nothing => Ok(None),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Reconciled {
    Keep(SessionGrant),
    Write(SessionGrant),
    Nothing,
}

/// Decide what the store should hold given its current grant and the
/// authority's record. Status never moves backwards for the same session,
/// and a stamped local window is never replaced.
fn reconcile(local: Option<&SessionGrant>, recovered: SessionGrant) -> Reconciled {
    match local {
        Some(local) if local.session_id() == recovered.session_id() => {
            let settled = local.is_pending() || local.local_window().is_some();
            if local.status() > recovered.status()
                || (local.status() == recovered.status() && settled)
            {
                Reconciled::Keep(local.clone())
            } else if recovered.status() == GrantStatus::Expired {
                Reconciled::Write(local.expire())
            } else {
                Reconciled::Write(recovered)
            }
        }
        _ if recovered.status() == GrantStatus::Expired => Reconciled::Nothing,
        _ => Reconciled::Write(recovered),
    }
}
