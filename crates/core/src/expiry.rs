//! Remaining-time computation for active grants.
//!
//! Everything here is a pure function of the stored absolute end instant and
//! the caller's `now`. There is no in-memory countdown to drift while a tab
//! is suspended or a page reloads.

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::{GrantStatus, SessionGrant};

/// Seconds left before `local_end_at`, rounded up and clamped at zero.
///
/// Any fraction of a second still counts, so the result is zero exactly
/// when the grant has lapsed. Grants without an actionable window (pending,
/// malformed) and expired grants report zero.
#[must_use]
pub fn remaining(grant: &SessionGrant, now: DateTime<Utc>) -> u64 {
    if grant.status() == GrantStatus::Expired || !grant.has_valid_budget() {
        return 0;
    }
    let Some((_, end)) = grant.local_window() else {
        return 0;
    };
    let left = end - now;
    if left <= TimeDelta::zero() {
        return 0;
    }
    u64::try_from(left.num_seconds()).unwrap_or(0) + u64::from(left.subsec_nanos() > 0)
}

/// True once an active grant can no longer be used at `now`.
///
/// A non-pending grant with no stamped window counts as lapsed. Pending
/// grants only lapse when their budget is invalid.
#[must_use]
pub fn is_lapsed(grant: &SessionGrant, now: DateTime<Utc>) -> bool {
    match grant.status() {
        GrantStatus::Expired => true,
        _ if !grant.has_valid_budget() => true,
        GrantStatus::Pending => false,
        GrantStatus::Active => match grant.local_window() {
            Some((_, end)) => now >= end,
            None => true,
        },
    }
}

/// Renders seconds as `MM:SS` for countdown displays.
#[must_use]
pub fn format_remaining(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
