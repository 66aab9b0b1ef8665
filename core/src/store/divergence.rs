use crate::{
    divergence::{Divergence, DivergenceId, Transition},
    error::{ReconError, ReconResult},
    event::{DivergenceEvent, DivergenceLogEntry},
    money::{CurrencyCode, MonetaryAmount, Rate},
    period::PeriodRange,
};
use super::Upsert;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const SELECT_COLUMNS: &str =
    "SELECT entity_id, period, rate_bps, currency,
            internal_remuneration, internal_contribution,
            portal_remuneration, portal_contribution,
            contribution_difference, detected_at, resolved, version
     FROM divergence";

/// Identity-keyed upsert with optimistic concurrency. A write that loses
/// the race on `version` is retried once against a fresh read; a second
/// loss surfaces `PersistenceConflict`.
///
/// `between` runs after every read and before the write that depends on
/// it. The store passes a no-op.
pub(super) fn upsert<F>(
    conn: &mut Connection,
    incoming: &Divergence,
    run_id: Option<&str>,
    mut between: F,
) -> ReconResult<Upsert>
where
    F: FnMut(&Connection) -> ReconResult<()>,
{
    let mut attempt = 1;
    loop {
        let current = read_versioned(conn, &incoming.id)?;
        between(conn)?;
        match write_versioned(conn, incoming, current, run_id) {
            Err(ReconError::PersistenceConflict { .. }) if attempt == 1 => {
                log::warn!("Lost upsert race on {}, retrying with fresh read", incoming.id);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// One write against the `current` row as read. Returns
/// `PersistenceConflict` when another writer changed the row since.
fn write_versioned(
    conn: &mut Connection,
    incoming: &Divergence,
    current: Option<(Divergence, i64)>,
    run_id: Option<&str>,
) -> ReconResult<Upsert> {
    let previous = current.as_ref().map(|(d, _)| d);

    let Some(transition) = Transition::between(previous, incoming) else {
        let stored = previous.cloned().unwrap_or_else(|| incoming.clone());
        return Ok(Upsert { stored, transition: None });
    };

    let tx = conn.transaction()?;
    let d = incoming;
    let written = match &current {
        None => tx.execute(
            "INSERT OR IGNORE INTO divergence
             (entity_id, period, rate_bps, currency,
              internal_remuneration, internal_contribution,
              portal_remuneration, portal_contribution,
              contribution_difference, detected_at, resolved, version)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,1)",
            params![
                d.id.entity,
                d.id.period.to_string(),
                d.id.rate.basis_points(),
                d.internal_remuneration.currency.as_str(),
                d.internal_remuneration.minor_units,
                d.internal_contribution.minor_units,
                d.portal_remuneration.minor_units,
                d.portal_contribution.minor_units,
                d.contribution_difference,
                d.detected_at.to_rfc3339(),
                d.resolved,
            ],
        )?,
        Some((_, version)) => tx.execute(
            "UPDATE divergence
             SET currency = ?1,
                 internal_remuneration = ?2, internal_contribution = ?3,
                 portal_remuneration = ?4, portal_contribution = ?5,
                 contribution_difference = ?6, detected_at = ?7, resolved = ?8,
                 version = version + 1
             WHERE entity_id = ?9 AND period = ?10 AND rate_bps = ?11 AND version = ?12",
            params![
                d.internal_remuneration.currency.as_str(),
                d.internal_remuneration.minor_units,
                d.internal_contribution.minor_units,
                d.portal_remuneration.minor_units,
                d.portal_contribution.minor_units,
                d.contribution_difference,
                d.detected_at.to_rfc3339(),
                d.resolved,
                d.id.entity,
                d.id.period.to_string(),
                d.id.rate.basis_points(),
                version,
            ],
        )?,
    };

    if written == 0 {
        // Dropping `tx` rolls back.
        return Err(ReconError::PersistenceConflict {
            entity: d.id.entity.clone(),
            period: d.id.period.to_string(),
            rate: d.id.rate.to_string(),
        });
    }

    let event = DivergenceEvent::for_transition(
        transition,
        d.detected_at,
        previous.map(|p| p.contribution_difference),
        d.contribution_difference,
    );
    tx.execute(
        "INSERT INTO divergence_event (entity_id, period, rate_bps, run_id, event_type, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            d.id.entity,
            d.id.period.to_string(),
            d.id.rate.basis_points(),
            run_id,
            event.event_type(),
            serde_json::to_string(&event)?,
        ],
    )?;
    tx.commit()?;

    log::debug!("Divergence {} {}", d.id, transition.as_str());
    Ok(Upsert {
        stored: incoming.clone(),
        transition: Some(transition),
    })
}

pub(super) fn read_versioned(
    conn: &Connection,
    id: &DivergenceId,
) -> ReconResult<Option<(Divergence, i64)>> {
    let sql = format!("{SELECT_COLUMNS} WHERE entity_id = ?1 AND period = ?2 AND rate_bps = ?3");
    let row = conn
        .query_row(
            &sql,
            params![id.entity, id.period.to_string(), id.rate.basis_points()],
            map_divergence_row,
        )
        .optional()?;
    Ok(row)
}

pub(super) fn open_for_entity(
    conn: &Connection,
    entity: &str,
    range: &PeriodRange,
) -> ReconResult<Vec<Divergence>> {
    let sql = format!(
        "{SELECT_COLUMNS}
         WHERE entity_id = ?1 AND resolved = 0 AND period >= ?2 AND period < ?3
         ORDER BY period ASC, rate_bps ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![entity, range.start.to_string(), range.end.to_string()],
            map_divergence_row,
        )?
        .map(|r| r.map(|(d, _)| d))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(super) fn history(conn: &Connection, id: &DivergenceId) -> ReconResult<Vec<DivergenceLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, run_id, event_type, payload
         FROM divergence_event
         WHERE entity_id = ?1 AND period = ?2 AND rate_bps = ?3
         ORDER BY id ASC",
    )?;
    let entries = stmt
        .query_map(
            params![id.entity, id.period.to_string(), id.rate.basis_points()],
            |row| {
                Ok(DivergenceLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn map_divergence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Divergence, i64)> {
    let currency: CurrencyCode = parse_column(row, 3)?;
    let amount = |idx: usize| -> rusqlite::Result<MonetaryAmount> {
        Ok(MonetaryAmount::new(row.get(idx)?, currency))
    };
    let detected_at: String = row.get(9)?;
    let detected_at = DateTime::parse_from_rfc3339(&detected_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(9, e))?;

    let divergence = Divergence {
        id: DivergenceId {
            entity: row.get(0)?,
            period: parse_column(row, 1)?,
            rate: Rate::from_basis_points(row.get(2)?),
        },
        internal_remuneration: amount(4)?,
        internal_contribution: amount(5)?,
        portal_remuneration: amount(6)?,
        portal_contribution: amount(7)?,
        contribution_difference: row.get(8)?,
        detected_at,
        resolved: row.get(10)?,
    };
    Ok((divergence, row.get(11)?))
}

fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}
