#![forbid(unsafe_code)]

pub mod error;
pub mod expiry;
pub mod model;
pub mod time;

pub use error::GrantError;
pub use time::Clock;
