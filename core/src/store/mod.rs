//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine calls store methods and never executes SQL directly.

use crate::{
    divergence::{Divergence, DivergenceId, Transition},
    error::{ReconError, ReconResult},
    event::DivergenceLogEntry,
    period::PeriodRange,
    report::RunReport,
};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

mod divergence;
mod run;

/// Result of an identity-keyed upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    /// The record as it now stands in the store, or the incoming record
    /// when a resolution found nothing stored.
    pub stored: Divergence,
    /// None when the incoming record matched and nothing was written.
    pub transition: Option<Transition>,
}

impl Upsert {
    pub fn was_changed(&self) -> bool {
        self.transition.is_some()
    }
}

/// Where divergences live. Substitutable so the engine can be driven
/// against a failing or instrumented store.
pub trait DivergenceStore: Send + Sync {
    /// Cheap reachability check. Failure here is fatal to a run.
    fn ping(&self) -> ReconResult<()>;

    /// Insert, overwrite, or leave alone, keyed on identity. A changed
    /// write also appends an audit event tagged with `run_id`.
    fn upsert_in_run(&self, divergence: &Divergence, run_id: Option<&str>) -> ReconResult<Upsert>;

    fn upsert_if_changed(&self, divergence: &Divergence) -> ReconResult<Upsert> {
        self.upsert_in_run(divergence, None)
    }

    fn find(&self, id: &DivergenceId) -> ReconResult<Option<Divergence>>;

    /// Unresolved divergences for `entity` whose period lies in `range`.
    fn open_for_entity(&self, entity: &str, range: &PeriodRange) -> ReconResult<Vec<Divergence>>;

    /// Audit trail for one identity, oldest first.
    fn history(&self, id: &DivergenceId) -> ReconResult<Vec<DivergenceLogEntry>>;

    fn record_run(&self, report: &RunReport) -> ReconResult<()>;
}

pub struct ReconStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ReconStore {
    /// Open (or create) the reconciliation database at `path`.
    pub fn open(path: &str) -> ReconResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ReconResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> ReconResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReconResult<()> {
        self.lock()?
            .execute_batch(include_str!("../../../migrations/001_divergence.sql"))?;
        Ok(())
    }

    fn lock(&self) -> ReconResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ReconError::StoreUnavailable("connection lock poisoned".into()))
    }
}

impl DivergenceStore for ReconStore {
    fn ping(&self) -> ReconResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM divergence", [], |row| row.get::<_, i64>(0))
            .map_err(|e| ReconError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    fn upsert_in_run(&self, divergence: &Divergence, run_id: Option<&str>) -> ReconResult<Upsert> {
        let mut conn = self.lock()?;
        divergence::upsert(&mut conn, divergence, run_id, |_| Ok(()))
    }

    fn find(&self, id: &DivergenceId) -> ReconResult<Option<Divergence>> {
        let conn = self.lock()?;
        Ok(divergence::read_versioned(&conn, id)?.map(|(d, _)| d))
    }

    fn open_for_entity(&self, entity: &str, range: &PeriodRange) -> ReconResult<Vec<Divergence>> {
        let conn = self.lock()?;
        divergence::open_for_entity(&conn, entity, range)
    }

    fn history(&self, id: &DivergenceId) -> ReconResult<Vec<DivergenceLogEntry>> {
        let conn = self.lock()?;
        divergence::history(&conn, id)
    }

    fn record_run(&self, report: &RunReport) -> ReconResult<()> {
        let conn = self.lock()?;
        run::insert_run(&conn, report)
    }
}
