#![forbid(unsafe_code)]

pub mod repository;
pub mod session_store;
pub mod sqlite;

pub use repository::{InMemoryRepository, SlotRepository, Storage, StorageError};
pub use session_store::{SESSION_SLOT, SessionStore};
