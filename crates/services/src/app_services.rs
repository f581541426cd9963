use std::sync::Arc;

use storage::{SessionStore, Storage};

use crate::Clock;
use crate::access_gate::{AccessGate, GrantObserver};
use crate::config::ApiConfig;
use crate::dashboard::DashboardClient;
use crate::error::AppServicesError;
use crate::restore::SessionRestore;
use crate::selection::SelectionService;
use crate::session_client::{HttpSessionClient, SessionAuthority};

/// Assembles app-facing services over one store and one authority.
#[derive(Clone)]
pub struct AppServices {
    store: SessionStore,
    gate: Arc<AccessGate>,
    selection: Arc<SelectionService>,
    restore: Arc<SessionRestore>,
    dashboard: Arc<DashboardClient>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage and the HTTP authority.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails or the
    /// HTTP clients cannot be built.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        api: ApiConfig,
        observers: Vec<Arc<dyn GrantObserver>>,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let authority: Arc<dyn SessionAuthority> = Arc::new(HttpSessionClient::new(api.clone())?);
        let dashboard = DashboardClient::new(api)?;
        Ok(Self::assemble(storage, clock, authority, dashboard, observers))
    }

    /// Wire services over an existing storage and authority.
    #[must_use]
    pub fn assemble(
        storage: Storage,
        clock: Clock,
        authority: Arc<dyn SessionAuthority>,
        dashboard: DashboardClient,
        observers: Vec<Arc<dyn GrantObserver>>,
    ) -> Self {
        let store = SessionStore::new(storage.slots);
        let gate = observers.into_iter().fold(
            AccessGate::new(clock, store.clone(), Arc::clone(&authority)),
            AccessGate::with_observer,
        );
        let restore = SessionRestore::new(clock, store.clone(), Arc::clone(&authority));
        let selection = SelectionService::new(store.clone(), authority);

        Self {
            store,
            gate: Arc::new(gate),
            selection: Arc::new(selection),
            restore: Arc::new(restore),
            dashboard: Arc::new(dashboard),
        }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn gate(&self) -> Arc<AccessGate> {
        Arc::clone(&self.gate)
    }

    #[must_use]
    pub fn selection(&self) -> Arc<SelectionService> {
        Arc::clone(&self.selection)
    }

    #[must_use]
    pub fn restore(&self) -> Arc<SessionRestore> {
        Arc::clone(&self.restore)
    }

    #[must_use]
    pub fn dashboard(&self) -> Arc<DashboardClient> {
        Arc::clone(&self.dashboard)
    }
}
