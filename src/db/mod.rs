mod repository;
mod schema;

use chrono::{DateTime, Duration, Utc};

pub use repository::Repository;

pub const DEFAULT_FRESHNESS_HOURS: i64 = 24;

/// A cached timestamp is fresh while it is younger than `max_age`.
pub fn is_fresh(timestamp: Option<DateTime<Utc>>, max_age: Duration) -> bool {
    is_fresh_at(timestamp, max_age, Utc::now())
}

pub fn is_fresh_at(timestamp: Option<DateTime<Utc>>, max_age: Duration, now: DateTime<Utc>) -> bool {
    match timestamp {
        Some(ts) => now - ts < max_age,
        None => false,
    }
}
