//! Single decision point consulted before lesson playback.
//!
//! Every entry into playback (dashboard, lesson preview, direct link) routes
//! through [`AccessGate::authorize`]. The gate reads the stored grant,
//! activates it against the authority at most once per gate instance at a
//! time, writes the confirmed grant back, and retires lapsed grants. With no
//! usable local grant it asks the authority for a session to resume.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use learn_core::expiry;
use learn_core::model::{GrantStatus, Language, SessionGrant, SessionId};
use learn_core::{Clock, GrantError};
use storage::SessionStore;
use tracing::{debug, info, warn};

use crate::error::{BlockReason, SessionClientError};
use crate::restore::SessionRestore;
use crate::session_client::SessionAuthority;

/// Outcome of one playback attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The grant is active and has time left.
    Allow { remaining_secs: u64 },
    /// The grant was activated by this attempt; playback may proceed.
    Activated { grant: SessionGrant },
    Deny(DenyReason),
}

impl Verdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. } | Self::Activated { .. })
    }

    /// Text to show the student, if playback is blocked.
    #[must_use]
    pub fn message(&self, language: Language) -> Option<&'static str> {
        match self {
            Self::Deny(reason) => Some(reason.message(language)),
            _ => None,
        }
    }
}

/// Why playback was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No duration has been selected.
    MissingGrant,
    /// The authority could not be reached or did not confirm. Retryable.
    ActivationFailed,
    /// This gate is already waiting on an activation for the grant.
    ActivationInProgress,
    /// The authority refused to start the session.
    ActivationBlocked(BlockReason),
    Expired,
    /// The stored grant is unusable (non-positive budget, missing window).
    Malformed,
}

impl DenyReason {
    #[must_use]
    pub fn message(&self, language: Language) -> &'static str {
        match (self, language) {
            (Self::MissingGrant, Language::En) => "select a duration first",
            (Self::MissingGrant, Language::Tl) => "Pumili muna ng oras bago magsimula!",
            (Self::ActivationFailed, Language::En) => "could not start, try again",
            (Self::ActivationFailed, Language::Tl) => {
                "Hindi masimulan ang aralin. Pakisubukang muli."
            }
            (Self::ActivationInProgress, Language::En) => "starting, please wait",
            (Self::ActivationInProgress, Language::Tl) => "Sandali lang, sinisimulan pa.",
            (Self::ActivationBlocked(_), Language::En) => "you already finished a session today",
            (Self::ActivationBlocked(_), Language::Tl) => {
                "Nakumpleto mo na ang iyong sesyon ngayon. Subukang muli bukas!"
            }
            (Self::Expired | Self::Malformed, Language::En) => "time expired",
            (Self::Expired | Self::Malformed, Language::Tl) => "Tapos na ang oras.",
        }
    }

    /// True when the same attempt may simply be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ActivationFailed | Self::ActivationInProgress)
    }
}

/// Grant lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantEvent {
    Activated(SessionGrant),
    Expired(SessionId),
}

/// Subscriber for grant transitions made by the gate.
pub trait GrantObserver: Send + Sync {
    fn on_event(&self, event: &GrantEvent);
}

pub struct AccessGate {
    clock: Clock,
    store: SessionStore,
    authority: Arc<dyn SessionAuthority>,
    restore: SessionRestore,
    observers: Vec<Arc<dyn GrantObserver>>,
    activating: AtomicBool,
}

impl AccessGate {
    #[must_use]
    pub fn new(clock: Clock, store: SessionStore, authority: Arc<dyn SessionAuthority>) -> Self {
        Self {
            restore: SessionRestore::new(clock, store.clone(), Arc::clone(&authority)),
            clock,
            store,
            authority,
            observers: Vec::new(),
            activating: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn GrantObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn GrantObserver>) -> Self {
        self.subscribe(observer);
        self
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Decide whether playback may proceed now.
    ///
    /// The clock is read at each decision point, so an activation window
    /// opens when the authority's confirmation arrives.
    pub async fn authorize(&self) -> Verdict {
        self.decide(None).await
    }

    /// Decide whether playback may proceed with time pinned at `now`.
    pub async fn authorize_at(&self, now: DateTime<Utc>) -> Verdict {
        self.decide(Some(now)).await
    }

    fn instant(&self, pinned: Option<DateTime<Utc>>) -> DateTime<Utc> {
        pinned.unwrap_or_else(|| self.clock.now())
    }

    async fn decide(&self, pinned: Option<DateTime<Utc>>) -> Verdict {
        let grant = match self.store.read().await {
            Some(grant) => grant,
            None => match self.recover(pinned).await {
                Some(grant) => grant,
                None => return Verdict::Deny(DenyReason::MissingGrant),
            },
        };

        if grant.is_pending() && grant.has_valid_budget() {
            return self.activate(grant, pinned).await;
        }
        self.settle(grant, self.instant(pinned)).await
    }

    /// A live grant recovered from the authority, if there is one.
    async fn recover(&self, pinned: Option<DateTime<Utc>>) -> Option<SessionGrant> {
        match self.restore.restore_with(pinned).await {
            Ok(Some(grant)) if grant.status() != GrantStatus::Expired => Some(grant),
            Ok(_) => {
                debug!("no session grant stored");
                None
            }
            Err(err) => {
                debug!(error = %err, "no session grant stored and restore failed");
                None
            }
        }
    }

    /// Seconds left on the stored grant at `now`; zero when there is none.
    pub async fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        self.store
            .read()
            .await
            .map_or(0, |grant| expiry::remaining(&grant, now))
    }

    /// Verdict for a grant that needs no network call to activate.
    async fn settle(&self, grant: SessionGrant, now: DateTime<Utc>) -> Verdict {
        match grant.status() {
            GrantStatus::Expired => Verdict::Deny(DenyReason::Expired),
            _ if !grant.has_valid_budget() => {
                warn!(
                    session_id = %grant.session_id(),
                    minutes_allowed = grant.minutes_allowed(),
                    "session grant has no usable budget"
                );
                self.retire(&grant, false).await;
                Verdict::Deny(DenyReason::Malformed)
            }
            // Pending grants with a valid budget go through `activate` instead.
            GrantStatus::Pending => Verdict::Deny(DenyReason::ActivationInProgress),
            GrantStatus::Active => match grant.local_window() {
                Some((_, end)) if now < end => Verdict::Allow {
                    remaining_secs: expiry::remaining(&grant, now),
                },
                Some(_) => {
                    self.retire(&grant, true).await;
                    Verdict::Deny(DenyReason::Expired)
                }
                None => {
                    warn!(session_id = %grant.session_id(), "active grant has no local window");
                    self.retire(&grant, true).await;
                    Verdict::Deny(DenyReason::Malformed)
                }
            },
        }
    }

    async fn activate(&self, grant: SessionGrant, pinned: Option<DateTime<Utc>>) -> Verdict {
        let Some(_in_flight) = InFlight::acquire(&self.activating) else {
            debug!(session_id = %grant.session_id(), "activation already in flight");
            return Verdict::Deny(DenyReason::ActivationInProgress);
        };

        // Another attempt may have finished between our read and the guard.
        let grant = match self.store.read().await {
            Some(current) if current.is_pending() => current,
            Some(current) => return self.settle(current, self.instant(pinned)).await,
            None => return Verdict::Deny(DenyReason::MissingGrant),
        };

        let session_id = grant.session_id().clone();
        info!(%session_id, "activating session grant");

        let confirmed = match self.authority.activate(&session_id).await {
            Ok(confirmed) => confirmed,
            Err(SessionClientError::Blocked(reason)) => {
                warn!(%session_id, %reason, "authority blocked activation");
                return Verdict::Deny(DenyReason::ActivationBlocked(reason));
            }
            Err(err) => {
                warn!(%session_id, error = %err, "session activation failed");
                return Verdict::Deny(DenyReason::ActivationFailed);
            }
        };

        let learned_at = self.instant(pinned);
        if confirmed.status == GrantStatus::Expired {
            info!(%session_id, "authority reports session already expired");
            self.retire(&grant, false).await;
            return Verdict::Deny(DenyReason::Expired);
        }

        let active = match grant.activate(&confirmed, learned_at) {
            Ok(active) => active,
            Err(err @ GrantError::InvalidBudget { .. }) => {
                warn!(%session_id, error = %err, "confirmed grant has no usable budget");
                self.retire(&grant, false).await;
                return Verdict::Deny(DenyReason::Malformed);
            }
            Err(err) => {
                warn!(%session_id, error = %err, "authority confirmation rejected");
                return Verdict::Deny(DenyReason::ActivationFailed);
            }
        };

        // An unpersisted window would be stamped again on the next entry.
        if let Err(err) = self.store.write(&active).await {
            warn!(%session_id, error = %err, "could not persist activated grant");
            return Verdict::Deny(DenyReason::ActivationFailed);
        }
        info!(
            %session_id,
            minutes_allowed = active.minutes_allowed(),
            "session grant activated"
        );
        self.notify(&GrantEvent::Activated(active.clone()));

        Verdict::Activated { grant: active }
    }

    /// Persist `grant` as expired and tell subscribers. When `end_remote` is
    /// set the authority is told too, best-effort.
    async fn retire(&self, grant: &SessionGrant, end_remote: bool) {
        let session_id = grant.session_id();
        // Re-read: a new selection may have replaced the grant during an
        // authority call, and it must not be overwritten.
        match self.store.read().await {
            Some(current) if current.session_id() == session_id => {
                if let Err(err) = self.store.write(&current.expire()).await {
                    warn!(%session_id, error = %err, "could not persist expired grant");
                }
            }
            _ => debug!(%session_id, "stored grant changed, leaving it in place"),
        }
        info!(%session_id, "session grant expired");
        self.notify(&GrantEvent::Expired(session_id.clone()));

        if end_remote {
            if let Err(err) = self.authority.end(session_id).await {
                debug!(%session_id, error = %err, "best-effort end-session failed");
            }
        }
    }

    fn notify(&self, event: &GrantEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Holds the gate's activation flag for the lifetime of one activation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
