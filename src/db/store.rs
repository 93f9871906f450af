//! Repository interface for outages and heartbeats.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;

use super::models::Outage;

/// Database error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Not found")]
    NotFound,
}

/// Operations available inside one storage transaction.
///
/// Everything done through one `OutageTx` commits or rolls back together.
pub trait OutageTx {
    /// The open outage (no end time) for a sub-component and source, if any.
    fn find_open(
        &mut self,
        component: &str,
        sub_component: &str,
        discovered_from: &str,
    ) -> Result<Option<Outage>, StoreError>;

    /// Outages active at `now`. `sub_component = None` covers the whole component.
    fn list_active(
        &mut self,
        component: &str,
        sub_component: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outage>, StoreError>;

    /// All outages for a sub-component, newest first.
    fn list(&mut self, component: &str, sub_component: &str) -> Result<Vec<Outage>, StoreError>;

    fn get(&mut self, component: &str, sub_component: &str, id: i64) -> Result<Option<Outage>, StoreError>;

    /// Insert a new outage with its reasons and threads; returns it with its id.
    fn create(&mut self, outage: &Outage) -> Result<Outage, StoreError>;

    /// Overwrite an existing outage, replacing its reasons and threads.
    fn save(&mut self, outage: &Outage) -> Result<(), StoreError>;

    /// Returns false when no such outage existed.
    fn delete(&mut self, id: i64) -> Result<bool, StoreError>;

    fn record_heartbeat(
        &mut self,
        component: &str,
        sub_component: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn last_heartbeat(
        &mut self,
        component: &str,
        sub_component: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Transactional outage persistence.
pub trait OutageStore: Send + Sync {
    /// Run `f` in a transaction, committing on `Ok` and rolling back on `Err`.
    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn OutageTx) -> Result<T, StoreError>;
}

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Format a timestamp for storage. Fixed width, so text order is time order.
pub fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// RFC 3339 rendering used in log lines.
pub fn display_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_time_round_trip_keeps_nanos() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(parse_db_time(&format_db_time(t)), Some(t));
    }

    #[test]
    fn test_parse_db_time_formats() {
        assert!(parse_db_time("2024-01-02 03:04:05").is_some());
        assert!(parse_db_time("2024-01-02T03:04:05Z").is_some());
        assert!(parse_db_time("yesterday").is_none());
    }
}
