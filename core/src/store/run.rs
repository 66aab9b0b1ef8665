use crate::{error::ReconResult, report::RunReport};
use rusqlite::{params, Connection};

pub(super) fn insert_run(conn: &Connection, report: &RunReport) -> ReconResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO recon_run
         (run_id, started_at, finished_at, period_start, period_end,
          tolerance_minor, succeeded, failed, changed, failures_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            report.run_id,
            report.started_at.to_rfc3339(),
            report.finished_at.to_rfc3339(),
            report.periods.first().map(|p| p.to_string()),
            report.periods.last().map(|p| p.to_string()),
            i64::from(report.tolerance),
            report.succeeded as i64,
            report.failed as i64,
            report.changes.len() as i64,
            serde_json::to_string(&report.failures)?,
        ],
    )?;
    Ok(())
}

impl super::ReconStore {
    /// Number of recorded runs. Used by tests and the runner summary.
    pub fn run_count(&self) -> ReconResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM recon_run", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Total divergence rows, open and resolved.
    pub fn divergence_count(&self) -> ReconResult<i64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM divergence", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn open_divergence_count(&self) -> ReconResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM divergence WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
