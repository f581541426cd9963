mod grant;
mod ids;
mod language;

pub use grant::{ConfirmedGrant, GrantStatus, SessionGrant};
pub use ids::{ChapterId, LessonId, ParseIdError, SessionId};
pub use language::Language;
