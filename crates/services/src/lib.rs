#![forbid(unsafe_code)]

pub mod access_gate;
pub mod app_services;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod restore;
pub mod selection;
pub mod session_client;

pub use learn_core::Clock;

pub use access_gate::{AccessGate, DenyReason, GrantEvent, GrantObserver, Verdict};
pub use app_services::AppServices;
pub use config::ApiConfig;
pub use dashboard::{Chapter, ChapterMode, Dashboard, DashboardClient, LessonState, LessonSummary, Profile};
pub use error::{
    AppServicesError, BlockReason, DashboardError, RestoreError, SelectionError,
    SessionClientError,
};
pub use restore::SessionRestore;
pub use selection::{OFFERED_MINUTES, SelectionOutcome, SelectionService};
pub use session_client::{HttpSessionClient, SessionAuthority};
