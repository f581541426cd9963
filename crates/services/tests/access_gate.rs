use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use learn_core::expiry;
use learn_core::model::{ConfirmedGrant, GrantStatus, Language, SessionGrant, SessionId};
use learn_core::time::fixed_now;
use services::{
    AccessGate, BlockReason, Clock, DenyReason, GrantEvent, GrantObserver, SessionAuthority,
    SessionClientError, Verdict,
};
use storage::{InMemoryRepository, SESSION_SLOT, SessionStore, SlotRepository, StorageError};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
enum Reply {
    Confirm { minutes: i64 },
    Fail,
    Blocked(BlockReason),
    AlreadyEnded,
}

struct FakeAuthority {
    reply: Mutex<Reply>,
    started_at: DateTime<Utc>,
    activate_calls: AtomicUsize,
    ended: Mutex<Vec<SessionId>>,
    gate: Option<Arc<Notify>>,
    current: Mutex<Option<ConfirmedGrant>>,
    delay: Option<StdDuration>,
    learned_at: Mutex<Option<DateTime<Utc>>>,
    replaced_by: Option<(SessionStore, SessionGrant)>,
}

impl FakeAuthority {
    fn new(reply: Reply) -> Self {
        Self {
            reply: Mutex::new(reply),
            started_at: fixed_now() - Duration::seconds(2),
            activate_calls: AtomicUsize::new(0),
            ended: Mutex::new(Vec::new()),
            gate: None,
            current: Mutex::new(None),
            delay: None,
            learned_at: Mutex::new(None),
            replaced_by: None,
        }
    }

    fn with_current(self, record: ConfirmedGrant) -> Self {
        *self.current.lock().unwrap() = Some(record);
        self
    }

    /// Answers activation only after `delay` of wall-clock time.
    fn slow(mut self, delay: StdDuration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Writes `grant` into `store` while an activation is in flight.
    fn replacing(mut self, store: SessionStore, grant: SessionGrant) -> Self {
        self.replaced_by = Some((store, grant));
        self
    }

    fn held_until(mut self, release: Arc<Notify>) -> Self {
        self.gate = Some(release);
        self
    }

    fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    fn activate_calls(&self) -> usize {
        self.activate_calls.load(Ordering::SeqCst)
    }

    fn ended(&self) -> Vec<SessionId> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionAuthority for FakeAuthority {
    async fn create(
        &self,
        minutes: i64,
        _mood: Option<&str>,
        _language: Language,
    ) -> Result<ConfirmedGrant, SessionClientError> {
        Ok(ConfirmedGrant {
            id: SessionId::from("created"),
            minutes_allowed: minutes,
            status: GrantStatus::Pending,
            started_at: None,
        })
    }

    async fn activate(&self, session_id: &SessionId) -> Result<ConfirmedGrant, SessionClientError> {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(release) = &self.gate {
            release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((store, grant)) = &self.replaced_by {
            store.write(grant).await.unwrap();
        }
        *self.learned_at.lock().unwrap() = Some(Utc::now());
        let reply = self.reply.lock().unwrap().clone();
        match reply {
            Reply::Confirm { minutes } => Ok(ConfirmedGrant {
                id: session_id.clone(),
                minutes_allowed: minutes,
                status: GrantStatus::Active,
                started_at: Some(self.started_at),
            }),
            Reply::Fail => Err(SessionClientError::HttpStatus(
                reqwest::StatusCode::BAD_GATEWAY,
            )),
            Reply::Blocked(reason) => Err(SessionClientError::Blocked(reason)),
            Reply::AlreadyEnded => Ok(ConfirmedGrant {
                id: session_id.clone(),
                minutes_allowed: 10,
                status: GrantStatus::Expired,
                started_at: Some(self.started_at),
            }),
        }
    }

    async fn current(&self) -> Result<Option<ConfirmedGrant>, SessionClientError> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn end(&self, session_id: &SessionId) -> Result<(), SessionClientError> {
        self.ended.lock().unwrap().push(session_id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<GrantEvent>>,
}

impl GrantObserver for RecordingObserver {
    fn on_event(&self, event: &GrantEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Slot backend whose next `put_slot` calls fail.
#[derive(Default)]
struct FlakySlots {
    inner: InMemoryRepository,
    failing_puts: AtomicUsize,
}

#[async_trait]
impl SlotRepository for FlakySlots {
    async fn get_slot(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_slot(key).await
    }

    async fn put_slot(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Connection("disk full".into()));
        }
        self.inner.put_slot(key, value).await
    }

    async fn clear_slot(&self, key: &str) -> Result<(), StorageError> {
        self.inner.clear_slot(key).await
    }
}

fn setup(reply: Reply) -> (SessionStore, Arc<FakeAuthority>, AccessGate) {
    with_authority(FakeAuthority::new(reply))
}

fn with_authority(authority: FakeAuthority) -> (SessionStore, Arc<FakeAuthority>, AccessGate) {
    let store = SessionStore::new(Arc::new(InMemoryRepository::new()));
    let authority = Arc::new(authority);
    let gate = AccessGate::new(
        Clock::fixed(fixed_now()),
        store.clone(),
        Arc::clone(&authority) as Arc<dyn SessionAuthority>,
    );
    (store, authority, gate)
}

fn active_grant(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> SessionGrant {
    SessionGrant::from_persisted(
        SessionId::from(id),
        10,
        GrantStatus::Active,
        Some(start),
        Some(start),
        Some(end),
    )
}

#[tokio::test]
async fn empty_store_denies_with_selection_prompt() {
    let (_, authority, gate) = setup(Reply::Confirm { minutes: 10 });

    let verdict = gate.authorize().await;

    assert_eq!(verdict, Verdict::Deny(DenyReason::MissingGrant));
    assert_eq!(verdict.message(Language::En), Some("select a duration first"));
    assert_eq!(authority.activate_calls(), 0);
}

#[tokio::test]
async fn pending_grant_is_activated_and_stored() {
    let (store, authority, gate) = setup(Reply::Confirm { minutes: 10 });
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 10))
        .await
        .unwrap();
    let now = fixed_now();

    let verdict = gate.authorize_at(now).await;

    let Verdict::Activated { grant } = verdict else {
        panic!("expected activation, got {verdict:?}");
    };
    assert_eq!(grant.status(), GrantStatus::Active);
    assert_eq!(grant.local_start_at(), Some(now));
    assert_eq!(grant.local_end_at(), Some(now + Duration::seconds(600)));
    assert_eq!(grant.started_at(), Some(authority.started_at));

    assert_eq!(store.read().await, Some(grant));
    assert_eq!(
        gate.authorize_at(now).await,
        Verdict::Allow {
            remaining_secs: 600
        }
    );
    assert_eq!(authority.activate_calls(), 1);
}

#[tokio::test]
async fn failed_activation_leaves_grant_pending() {
    let (store, authority, gate) = setup(Reply::Fail);
    let pending = SessionGrant::pending(SessionId::from("s1"), 10);
    store.write(&pending).await.unwrap();

    let verdict = gate.authorize().await;

    assert_eq!(verdict, Verdict::Deny(DenyReason::ActivationFailed));
    assert_eq!(verdict.message(Language::En), Some("could not start, try again"));
    assert_eq!(store.read().await, Some(pending.clone()));

    authority.set_reply(Reply::Confirm { minutes: 10 });
    assert!(gate.authorize().await.is_allowed());
    assert_eq!(authority.activate_calls(), 2);
}

#[tokio::test]
async fn lapsed_grant_is_denied_and_persisted_expired() {
    let (store, authority, gate) = setup(Reply::Confirm { minutes: 10 });
    let now = fixed_now();
    let lapsed = active_grant("s1", now - Duration::minutes(10), now - Duration::seconds(1));
    store.write(&lapsed).await.unwrap();

    let verdict = gate.authorize_at(now).await;

    assert_eq!(verdict, Verdict::Deny(DenyReason::Expired));
    assert_eq!(verdict.message(Language::En), Some("time expired"));
    let stored = store.read().await.unwrap();
    assert_eq!(stored.status(), GrantStatus::Expired);
    assert_eq!(stored.local_end_at(), lapsed.local_end_at());
    assert_eq!(authority.ended(), vec![SessionId::from("s1")]);

    // Stays expired; no second end-session call.
    assert_eq!(gate.authorize_at(now).await, Verdict::Deny(DenyReason::Expired));
    assert_eq!(authority.ended().len(), 1);
}

#[tokio::test]
async fn active_grant_is_allowed_until_end_instant() {
    let (_, _, gate) = setup(Reply::Fail);
    let now = fixed_now();
    let end = now + Duration::minutes(3);
    gate.store()
        .write(&active_grant("s1", now, end))
        .await
        .unwrap();

    for offset in [0, 60, 179] {
        let verdict = gate.authorize_at(now + Duration::seconds(offset)).await;
        assert!(verdict.is_allowed(), "offset {offset}: {verdict:?}");
    }
    assert_eq!(gate.authorize_at(end).await, Verdict::Deny(DenyReason::Expired));
}

#[tokio::test]
async fn repeated_entry_does_not_reset_local_start() {
    let (store, authority, gate) = setup(Reply::Confirm { minutes: 10 });
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 10))
        .await
        .unwrap();
    let first_at = fixed_now();

    assert!(gate.authorize_at(first_at).await.is_allowed());
    let after_first = store.read().await.unwrap();

    let second = gate.authorize_at(first_at + Duration::seconds(30)).await;
    assert_eq!(
        second,
        Verdict::Allow {
            remaining_secs: 570
        }
    );
    assert_eq!(store.read().await, Some(after_first));
    assert_eq!(authority.activate_calls(), 1);
}

#[tokio::test]
async fn non_positive_budget_is_never_allowed() {
    for minutes in [0, -5] {
        let (store, authority, gate) = setup(Reply::Confirm { minutes: 10 });
        store
            .write(&SessionGrant::pending(SessionId::from("s1"), minutes))
            .await
            .unwrap();

        let verdict = gate.authorize().await;

        assert_eq!(verdict, Verdict::Deny(DenyReason::Malformed));
        assert_eq!(verdict.message(Language::En), Some("time expired"));
        assert_eq!(store.read().await.unwrap().status(), GrantStatus::Expired);
        assert_eq!(authority.activate_calls(), 0);
    }

    let (store, _, gate) = setup(Reply::Confirm { minutes: 10 });
    let now = fixed_now();
    let broken = SessionGrant::from_persisted(
        SessionId::from("s1"),
        0,
        GrantStatus::Active,
        None,
        Some(now),
        Some(now + Duration::hours(1)),
    );
    store.write(&broken).await.unwrap();
    assert!(!gate.authorize_at(now).await.is_allowed());
}

#[tokio::test]
async fn authority_reported_expiry_retires_grant() {
    let (store, _, gate) = setup(Reply::AlreadyEnded);
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 10))
        .await
        .unwrap();

    assert_eq!(gate.authorize().await, Verdict::Deny(DenyReason::Expired));
    assert_eq!(store.read().await.unwrap().status(), GrantStatus::Expired);
}

#[tokio::test]
async fn blocked_activation_keeps_grant_pending() {
    let (store, _, gate) = setup(Reply::Blocked(BlockReason::SessionRecent));
    let pending = SessionGrant::pending(SessionId::from("s1"), 10);
    store.write(&pending).await.unwrap();

    let verdict = gate.authorize().await;

    assert_eq!(
        verdict,
        Verdict::Deny(DenyReason::ActivationBlocked(BlockReason::SessionRecent))
    );
    assert_eq!(store.read().await, Some(pending));
}

#[tokio::test]
async fn corrupt_record_is_treated_as_missing() {
    let repo = InMemoryRepository::new();
    repo.put_slot(SESSION_SLOT, "{\"session_id\":").await.unwrap();
    let gate = AccessGate::new(
        Clock::fixed(fixed_now()),
        SessionStore::new(Arc::new(repo)),
        Arc::new(FakeAuthority::new(Reply::Confirm { minutes: 10 })),
    );

    assert_eq!(gate.authorize().await, Verdict::Deny(DenyReason::MissingGrant));
}

#[tokio::test]
async fn concurrent_entry_issues_one_activation() {
    let release = Arc::new(Notify::new());
    let store = SessionStore::new(Arc::new(InMemoryRepository::new()));
    let authority = Arc::new(
        FakeAuthority::new(Reply::Confirm { minutes: 10 }).held_until(Arc::clone(&release)),
    );
    let gate = AccessGate::new(
        Clock::fixed(fixed_now()),
        store.clone(),
        Arc::clone(&authority) as Arc<dyn SessionAuthority>,
    );
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 10))
        .await
        .unwrap();

    let (first, second, ()) = tokio::join!(gate.authorize(), gate.authorize(), async {
        release.notify_one();
    });

    assert!(matches!(first, Verdict::Activated { .. }));
    assert_eq!(second, Verdict::Deny(DenyReason::ActivationInProgress));
    assert_eq!(authority.activate_calls(), 1);

    // Guard is released afterwards.
    assert!(gate.authorize().await.is_allowed());
}

#[tokio::test]
async fn observers_hear_activation_and_expiry() {
    let observer = Arc::new(RecordingObserver::default());
    let store = SessionStore::new(Arc::new(InMemoryRepository::new()));
    let gate = AccessGate::new(
        Clock::fixed(fixed_now()),
        store.clone(),
        Arc::new(FakeAuthority::new(Reply::Confirm { minutes: 1 })),
    )
    .with_observer(Arc::clone(&observer) as Arc<dyn GrantObserver>);
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 1))
        .await
        .unwrap();

    let now = fixed_now();
    let Verdict::Activated { grant } = gate.authorize_at(now).await else {
        panic!("expected activation");
    };
    gate.authorize_at(now + Duration::minutes(2)).await;

    let events = observer.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            GrantEvent::Activated(grant),
            GrantEvent::Expired(SessionId::from("s1")),
        ]
    );
}

#[tokio::test]
async fn remaining_is_recomputed_from_stored_end() {
    let (store, _, gate) = setup(Reply::Confirm { minutes: 10 });
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 10))
        .await
        .unwrap();
    let now = fixed_now();
    gate.authorize_at(now).await;

    let first = gate.remaining_at(now).await;
    let second = gate.remaining_at(now + Duration::seconds(5)).await;
    assert_eq!(first, 600);
    assert_eq!(first - second, 5);

    // A fresh gate over the same store, as after a page reload.
    let reloaded = store.read().await.unwrap();
    assert_eq!(
        expiry::remaining(&reloaded, now + Duration::seconds(5)),
        second
    );
}

#[tokio::test]
async fn window_opens_when_activation_is_confirmed() {
    let store = SessionStore::new(Arc::new(InMemoryRepository::new()));
    let authority = Arc::new(
        FakeAuthority::new(Reply::Confirm { minutes: 10 }).slow(StdDuration::from_millis(300)),
    );
    let gate = AccessGate::new(
        Clock::default_clock(),
        store.clone(),
        Arc::clone(&authority) as Arc<dyn SessionAuthority>,
    );
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 10))
        .await
        .unwrap();

    let Verdict::Activated { grant } = gate.authorize().await else {
        panic!("expected activation");
    };

    let learned_at = authority.learned_at.lock().unwrap().unwrap();
    let start = grant.local_start_at().unwrap();
    assert!(start >= learned_at, "window opened {start} before {learned_at}");
    assert_eq!(grant.local_end_at(), Some(start + Duration::minutes(10)));
}

#[tokio::test]
async fn unpersisted_activation_is_denied_and_not_restamped() {
    let slots = Arc::new(FlakySlots::default());
    let store = SessionStore::new(Arc::clone(&slots) as Arc<dyn SlotRepository>);
    let authority = Arc::new(FakeAuthority::new(Reply::Confirm { minutes: 10 }));
    let observer = Arc::new(RecordingObserver::default());
    let gate = AccessGate::new(
        Clock::fixed(fixed_now()),
        store.clone(),
        Arc::clone(&authority) as Arc<dyn SessionAuthority>,
    )
    .with_observer(Arc::clone(&observer) as Arc<dyn GrantObserver>);
    let pending = SessionGrant::pending(SessionId::from("s1"), 10);
    store.write(&pending).await.unwrap();
    slots.failing_puts.store(1, Ordering::SeqCst);

    let now = fixed_now();
    let verdict = gate.authorize_at(now).await;

    assert_eq!(verdict, Verdict::Deny(DenyReason::ActivationFailed));
    assert_eq!(store.read().await, Some(pending));
    assert!(observer.events.lock().unwrap().is_empty());

    // The retry opens the only window that is ever granted.
    let later = now + Duration::minutes(9);
    let Verdict::Activated { grant } = gate.authorize_at(later).await else {
        panic!("expected activation on retry");
    };
    assert_eq!(grant.local_start_at(), Some(later));
    assert_eq!(store.read().await, Some(grant));
    assert_eq!(authority.activate_calls(), 2);
}

#[tokio::test]
async fn lost_local_grant_is_restored_from_authority() {
    let now = fixed_now();
    let started = now - Duration::minutes(4);
    let (store, authority, gate) = with_authority(
        FakeAuthority::new(Reply::Fail).with_current(ConfirmedGrant {
            id: SessionId::from("s1"),
            minutes_allowed: 10,
            status: GrantStatus::Active,
            started_at: Some(started),
        }),
    );

    assert_eq!(
        gate.authorize_at(now).await,
        Verdict::Allow {
            remaining_secs: 360
        }
    );

    let restored = store.read().await.unwrap();
    assert_eq!(restored.status(), GrantStatus::Active);
    assert_eq!(restored.local_start_at(), Some(started));
    assert_eq!(restored.local_end_at(), Some(started + Duration::minutes(10)));
    assert_eq!(authority.activate_calls(), 0);
}

#[tokio::test]
async fn corrupt_pending_grant_is_restored_then_activated() {
    let repo = InMemoryRepository::new();
    repo.put_slot(SESSION_SLOT, "{oops").await.unwrap();
    let store = SessionStore::new(Arc::new(repo));
    let authority = Arc::new(FakeAuthority::new(Reply::Confirm { minutes: 5 }).with_current(
        ConfirmedGrant {
            id: SessionId::from("s9"),
            minutes_allowed: 5,
            status: GrantStatus::Pending,
            started_at: None,
        },
    ));
    let gate = AccessGate::new(
        Clock::fixed(fixed_now()),
        store.clone(),
        Arc::clone(&authority) as Arc<dyn SessionAuthority>,
    );

    let Verdict::Activated { grant } = gate.authorize().await else {
        panic!("expected activation of restored grant");
    };
    assert_eq!(grant.session_id(), &SessionId::from("s9"));
    assert_eq!(store.read().await, Some(grant));
    assert_eq!(authority.activate_calls(), 1);
}

#[tokio::test]
async fn expired_authority_record_is_not_resumed() {
    let (store, _, gate) = with_authority(FakeAuthority::new(Reply::Fail).with_current(
        ConfirmedGrant {
            id: SessionId::from("s1"),
            minutes_allowed: 10,
            status: GrantStatus::Expired,
            started_at: None,
        },
    ));

    assert_eq!(gate.authorize().await, Verdict::Deny(DenyReason::MissingGrant));
    assert_eq!(store.read().await, None);
}

#[tokio::test]
async fn last_partial_second_still_counts() {
    let (store, _, gate) = setup(Reply::Fail);
    let now = fixed_now();
    let end = now + Duration::minutes(1);
    store.write(&active_grant("s1", now, end)).await.unwrap();

    assert_eq!(
        gate.authorize_at(end - Duration::nanoseconds(1)).await,
        Verdict::Allow { remaining_secs: 1 }
    );
}

#[tokio::test]
async fn retiring_keeps_a_grant_selected_meanwhile() {
    let store = SessionStore::new(Arc::new(InMemoryRepository::new()));
    let fresh = SessionGrant::pending(SessionId::from("s2"), 15);
    let authority = Arc::new(
        FakeAuthority::new(Reply::AlreadyEnded).replacing(store.clone(), fresh.clone()),
    );
    let gate = AccessGate::new(
        Clock::fixed(fixed_now()),
        store.clone(),
        Arc::clone(&authority) as Arc<dyn SessionAuthority>,
    );
    store
        .write(&SessionGrant::pending(SessionId::from("s1"), 10))
        .await
        .unwrap();

    assert_eq!(gate.authorize().await, Verdict::Deny(DenyReason::Expired));
    assert_eq!(store.read().await, Some(fresh));
}
