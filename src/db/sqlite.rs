//! SQLite outage store.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row, Transaction,
    TransactionBehavior,
};
use std::path::Path;
use std::sync::Arc;

use super::models::*;
use super::store::*;

const OUTAGE_COLUMNS: &str = "id, component_name, sub_component_name, severity, start_time, end_time, \
     confirmed_at, description, triage_notes, discovered_from, created_by, resolved_by, confirmed_by, \
     created_at, updated_at";

/// Thread-safe SQLite store.
///
/// One connection serialized behind a mutex; every transaction starts with
/// `BEGIN IMMEDIATE` so the dedup read and the following write are atomic.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// A private in-memory database, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }
}

impl OutageStore for SqliteStore {
    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn OutageTx) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        let mut tx = SqliteTx {
            tx: conn.transaction_with_behavior(TransactionBehavior::Immediate)?,
        };
        // Dropping an uncommitted transaction rolls it back.
        let out = f(&mut tx)?;
        tx.tx.commit()?;
        Ok(out)
    }
}

struct SqliteTx<'conn> {
    tx: Transaction<'conn>,
}

impl SqliteTx<'_> {
    fn query_outages(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Outage>, StoreError> {
        let mut stmt = self.tx.prepare(sql)?;
        let mut outages = stmt
            .query_map(params, outage_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        drop(stmt);

        for outage in &mut outages {
            self.load_children(outage)?;
        }
        Ok(outages)
    }

    fn load_children(&self, outage: &mut Outage) -> Result<(), StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT type, check_name, results FROM reasons WHERE outage_id = ?1 ORDER BY position ASC",
        )?;
        outage.reasons = stmt
            .query_map(params![outage.id], |row| {
                Ok(Reason {
                    reason_type: row.get(0)?,
                    check: row.get(1)?,
                    results: row.get(2)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut stmt = self
            .tx
            .prepare("SELECT channel, thread_url FROM slack_threads WHERE outage_id = ?1 ORDER BY id ASC")?;
        outage.slack_threads = stmt
            .query_map(params![outage.id], |row| {
                Ok(SlackThread {
                    channel: row.get(0)?,
                    thread_url: row.get(1)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(())
    }

    fn insert_children(&self, outage: &Outage) -> Result<(), StoreError> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO reasons (outage_id, position, type, check_name, results) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, reason) in outage.reasons.iter().enumerate() {
            stmt.execute(params![
                outage.id,
                position as i64,
                reason.reason_type,
                reason.check,
                reason.results,
            ])?;
        }

        let mut stmt = self
            .tx
            .prepare("INSERT INTO slack_threads (outage_id, channel, thread_url) VALUES (?1, ?2, ?3)")?;
        for thread in &outage.slack_threads {
            stmt.execute(params![outage.id, thread.channel, thread.thread_url])?;
        }

        Ok(())
    }
}

impl OutageTx for SqliteTx<'_> {
    fn find_open(
        &mut self,
        component: &str,
        sub_component: &str,
        discovered_from: &str,
    ) -> Result<Option<Outage>, StoreError> {
        let sql = format!(
            "SELECT {} FROM outages WHERE component_name = ?1 AND sub_component_name = ?2 \
             AND discovered_from = ?3 AND end_time IS NULL",
            OUTAGE_COLUMNS
        );
        Ok(self
            .query_outages(&sql, params![component, sub_component, discovered_from])?
            .into_iter()
            .next())
    }

    fn list_active(
        &mut self,
        component: &str,
        sub_component: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outage>, StoreError> {
        let sql = format!(
            "SELECT {} FROM outages WHERE component_name = ?1 AND (?2 IS NULL OR sub_component_name = ?2) \
             AND start_time <= ?3 AND (end_time IS NULL OR end_time > ?3) ORDER BY start_time DESC, id DESC",
            OUTAGE_COLUMNS
        );
        self.query_outages(&sql, params![component, sub_component, format_db_time(now)])
    }

    fn list(&mut self, component: &str, sub_component: &str) -> Result<Vec<Outage>, StoreError> {
        let sql = format!(
            "SELECT {} FROM outages WHERE component_name = ?1 AND sub_component_name = ?2 \
             ORDER BY start_time DESC, id DESC",
            OUTAGE_COLUMNS
        );
        self.query_outages(&sql, params![component, sub_component])
    }

    fn get(&mut self, component: &str, sub_component: &str, id: i64) -> Result<Option<Outage>, StoreError> {
        let sql = format!(
            "SELECT {} FROM outages WHERE id = ?1 AND component_name = ?2 AND sub_component_name = ?3",
            OUTAGE_COLUMNS
        );
        Ok(self
            .query_outages(&sql, params![id, component, sub_component])?
            .into_iter()
            .next())
    }

    fn create(&mut self, outage: &Outage) -> Result<Outage, StoreError> {
        self.tx
            .execute(
                "INSERT INTO outages (component_name, sub_component_name, severity, start_time, end_time, \
                 confirmed_at, description, triage_notes, discovered_from, created_by, resolved_by, \
                 confirmed_by, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    outage.component_name,
                    outage.sub_component_name,
                    outage.severity.as_str(),
                    format_db_time(outage.start_time),
                    outage.end_time.map(format_db_time),
                    outage.confirmed_at.map(format_db_time),
                    outage.description,
                    outage.triage_notes,
                    outage.discovered_from,
                    outage.created_by,
                    outage.resolved_by,
                    outage.confirmed_by,
                    format_db_time(outage.created_at),
                    format_db_time(outage.updated_at),
                ],
            )
            .map_err(|e| constraint_conflict(e, outage))?;

        let mut created = outage.clone();
        created.id = self.tx.last_insert_rowid();
        self.insert_children(&created)?;
        Ok(created)
    }

    fn save(&mut self, outage: &Outage) -> Result<(), StoreError> {
        let changed = self
            .tx
            .execute(
                "UPDATE outages SET severity = ?1, start_time = ?2, end_time = ?3, confirmed_at = ?4, \
                 description = ?5, triage_notes = ?6, created_by = ?7, resolved_by = ?8, confirmed_by = ?9, \
                 updated_at = ?10 WHERE id = ?11",
                params![
                    outage.severity.as_str(),
                    format_db_time(outage.start_time),
                    outage.end_time.map(format_db_time),
                    outage.confirmed_at.map(format_db_time),
                    outage.description,
                    outage.triage_notes,
                    outage.created_by,
                    outage.resolved_by,
                    outage.confirmed_by,
                    format_db_time(outage.updated_at),
                    outage.id,
                ],
            )
            .map_err(|e| constraint_conflict(e, outage))?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }

        self.tx.execute("DELETE FROM reasons WHERE outage_id = ?1", params![outage.id])?;
        self.tx.execute("DELETE FROM slack_threads WHERE outage_id = ?1", params![outage.id])?;
        self.insert_children(outage)
    }

    fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        // Children go with the outage through ON DELETE CASCADE.
        let changed = self.tx.execute("DELETE FROM outages WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn record_heartbeat(
        &mut self,
        component: &str,
        sub_component: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Never move a heartbeat backwards when reports arrive out of order.
        self.tx.execute(
            "INSERT INTO component_report_pings (component_name, sub_component_name, last_seen) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(component_name, sub_component_name) DO UPDATE SET \
             last_seen = MAX(last_seen, excluded.last_seen)",
            params![component, sub_component, format_db_time(at)],
        )?;
        Ok(())
    }

    fn last_heartbeat(
        &mut self,
        component: &str,
        sub_component: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw: Option<String> = self
            .tx
            .query_row(
                "SELECT last_seen FROM component_report_pings \
                 WHERE component_name = ?1 AND sub_component_name = ?2",
                params![component, sub_component],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| time_column(0, &s)).transpose()?)
    }
}

fn constraint_conflict(e: rusqlite::Error, outage: &Outage) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(format!(
                "an open outage from {} already exists for {}/{}",
                outage.discovered_from, outage.component_name, outage.sub_component_name
            ))
        }
        other => StoreError::Sqlite(other),
    }
}

fn time_column(idx: usize, raw: &str) -> SqlResult<DateTime<Utc>> {
    parse_db_time(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("bad timestamp {:?}", raw).into())
    })
}

fn optional_time_column(row: &Row, idx: usize) -> SqlResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| time_column(idx, &s)).transpose()
}

fn outage_from_row(row: &Row) -> SqlResult<Outage> {
    let severity: String = row.get(3)?;
    let severity = severity
        .parse::<Severity>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;

    Ok(Outage {
        id: row.get(0)?,
        component_name: row.get(1)?,
        sub_component_name: row.get(2)?,
        severity,
        start_time: time_column(4, &row.get::<_, String>(4)?)?,
        end_time: optional_time_column(row, 5)?,
        confirmed_at: optional_time_column(row, 6)?,
        description: row.get(7)?,
        triage_notes: row.get(8)?,
        discovered_from: row.get(9)?,
        created_by: row.get(10)?,
        resolved_by: row.get(11)?,
        confirmed_by: row.get(12)?,
        reasons: Vec::new(),
        slack_threads: Vec::new(),
        created_at: time_column(13, &row.get::<_, String>(13)?)?,
        updated_at: time_column(14, &row.get::<_, String>(14)?)?,
    })
}
