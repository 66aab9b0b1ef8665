//! The reconciliation engine.
//!
//! RUN ORDER (fixed):
//!   1. Store reachability check    (failure is fatal to the run)
//!   2. Closed-period window
//!   3. Fetch phase                 (all entities concurrently, both sources
//!                                   per entity concurrently, through gates)
//!   4. Cancellation checkpoint     (nothing has been written yet)
//!   5. Settle phase, per entity    (plan every write, then apply them)
//!   6. Run ledger entry
//!
//! RULES:
//!   - The only suspension points are source calls in the fetch phase.
//!     Store calls are synchronous SQLite and run inline on the runtime;
//!     a run settles one entity at a time.
//!   - A cancelled run persists nothing.
//!   - One entity's failure never aborts the run; it is reported.
//!   - An entity whose comparison fails writes nothing. Writes that landed
//!     before a store failure are still listed in the report.

use crate::{
    bucket::{bucketize, BucketKey},
    cancel::CancelToken,
    clock::Clock,
    compare::{compare, Tolerance},
    config::ReconConfig,
    divergence::Divergence,
    error::{ReconError, ReconResult},
    gate::SourceGate,
    period::{closed_periods_as_of, window_range, PeriodRange},
    report::{DivergenceChange, EntityFailure, RunReport},
    rng::JitterRng,
    source::{AggregateRecord, AggregateSource, SourceKind},
    store::DivergenceStore,
    types::{EntityId, RunId},
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct ReconEngine {
    config: ReconConfig,
    scope: Vec<EntityId>,
    internal: Arc<dyn AggregateSource>,
    portal: Arc<dyn AggregateSource>,
    internal_gate: SourceGate,
    portal_gate: SourceGate,
    store: Arc<dyn DivergenceStore>,
    clock: Arc<dyn Clock>,
}

impl ReconEngine {
    /// Wire an engine for a fixed entity scope. Duplicate entities in
    /// `scope` are reconciled once.
    pub fn new(
        config: ReconConfig,
        scope: Vec<EntityId>,
        internal: Arc<dyn AggregateSource>,
        portal: Arc<dyn AggregateSource>,
        store: Arc<dyn DivergenceStore>,
        clock: Arc<dyn Clock>,
    ) -> ReconResult<Self> {
        config.validate()?;
        if internal.kind() != SourceKind::Internal || portal.kind() != SourceKind::Portal {
            return Err(ReconError::InvalidConfig(format!(
                "sources wired as ({}, {}), expected (internal, portal)",
                internal.kind(),
                portal.kind()
            )));
        }

        let rng_for = |index: u64| match config.jitter_seed {
            Some(seed) => JitterRng::seeded(seed, index),
            None => JitterRng::from_entropy(),
        };
        let internal_gate = SourceGate::new(SourceKind::Internal.name(), &config.internal, rng_for(0));
        let portal_gate = SourceGate::new(SourceKind::Portal.name(), &config.portal, rng_for(1));

        let mut seen = BTreeSet::new();
        let scope = scope
            .into_iter()
            .filter(|e| seen.insert(e.clone()))
            .collect();

        Ok(Self {
            config,
            scope,
            internal,
            portal,
            internal_gate,
            portal_gate,
            store,
            clock,
        })
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn scope(&self) -> &[EntityId] {
        &self.scope
    }

    pub fn gate(&self, kind: SourceKind) -> &SourceGate {
        match kind {
            SourceKind::Internal => &self.internal_gate,
            SourceKind::Portal => &self.portal_gate,
        }
    }

    /// Reconcile the last `period_count` closed periods for every entity
    /// in scope.
    pub async fn reconcile(&self, period_count: i64, tolerance: Tolerance) -> ReconResult<RunReport> {
        self.reconcile_with_cancel(period_count, tolerance, &CancelToken::new())
            .await
    }

    pub async fn reconcile_with_cancel(
        &self,
        period_count: i64,
        tolerance: Tolerance,
        cancel: &CancelToken,
    ) -> ReconResult<RunReport> {
        self.store.ping().map_err(|e| match e {
            ReconError::StoreUnavailable(_) => e,
            other => ReconError::StoreUnavailable(other.to_string()),
        })?;

        let started_at = self.clock.now();
        let run_id: RunId = format!("recon-{}", uuid::Uuid::new_v4());
        let periods = closed_periods_as_of(self.clock.today(), period_count);
        let mut report = RunReport {
            run_id: run_id.clone(),
            started_at,
            finished_at: started_at,
            periods,
            tolerance,
            changes: Vec::new(),
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
        };

        let Some(range) = window_range(&report.periods) else {
            log::info!("Run {run_id}: empty period window, nothing to reconcile");
            return self.finish(report);
        };
        log::info!(
            "Run {run_id}: reconciling {} entities over {range}, tolerance {}",
            self.scope.len(),
            tolerance.minor_units()
        );

        // ── Fetch phase ────────────────────────────────────────────
        let fetched = join_all(
            self.scope
                .iter()
                .map(|entity| self.fetch_entity(entity, range, cancel)),
        )
        .await;

        if cancel.is_cancelled() {
            log::warn!("Run {run_id}: cancelled during fetch, discarding all fetched data");
            return Err(ReconError::Cancelled);
        }

        // ── Settle phase ───────────────────────────────────────────
        let detected_at = self.clock.now();
        for (entity, outcome) in self.scope.iter().zip(fetched) {
            let settled = outcome
                .and_then(|records| self.plan_entity(entity, &range, records, tolerance, detected_at))
                .and_then(|planned| self.apply_all(&run_id, &planned, &mut report.changes));
            match settled {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    log::warn!("Run {run_id}: entity {entity} failed: {err}");
                    report.failed += 1;
                    report.failures.push(EntityFailure {
                        entity: entity.clone(),
                        reason: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                }
            }
        }

        self.finish(report)
    }

    async fn fetch_entity(
        &self,
        entity: &EntityId,
        range: PeriodRange,
        cancel: &CancelToken,
    ) -> ReconResult<Vec<AggregateRecord>> {
        let (internal, portal) = tokio::join!(
            self.internal_gate
                .call(cancel, || self.internal.fetch_aggregates(entity, range)),
            self.portal_gate
                .call(cancel, || self.portal.fetch_aggregates(entity, range)),
        );
        let mut records = internal?;
        records.extend(portal?);
        Ok(records)
    }

    /// Compare one entity's buckets against each other and against its
    /// open divergences. Returns the records to write; touches nothing.
    fn plan_entity(
        &self,
        entity: &EntityId,
        range: &PeriodRange,
        records: Vec<AggregateRecord>,
        tolerance: Tolerance,
        detected_at: DateTime<Utc>,
    ) -> ReconResult<Vec<Divergence>> {
        let total = records.len();
        let records: Vec<AggregateRecord> = records
            .into_iter()
            .filter(|r| r.entity == *entity && range.contains(&r.period))
            .collect();
        if records.len() < total {
            log::warn!(
                "{entity}: dropped {} records outside {range} or for another entity",
                total - records.len()
            );
        }

        let currency = self.config.currency;
        let buckets = bucketize(&records, currency)?;
        let mut planned = Vec::new();
        let mut diverged: BTreeSet<BucketKey> = BTreeSet::new();

        for key in buckets.keys() {
            let (internal, portal) = buckets.pair(&key, currency);
            if let Some(divergence) = compare(entity, key, &internal, &portal, tolerance, detected_at)? {
                diverged.insert(key);
                planned.push(divergence);
            }
        }

        // Anything still open that no longer diverges is resolved,
        // including keys that vanished from both sides.
        for open in self.store.open_for_entity(entity, range)? {
            let key = open.id.key();
            if diverged.contains(&key) {
                continue;
            }
            let (internal, portal) = buckets.pair(&key, currency);
            planned.push(open.resolved_with(internal, portal, detected_at));
        }

        Ok(planned)
    }

    /// Upsert `planned` in order. Each changed write is pushed onto
    /// `changes` as it lands, so a later failure keeps the earlier ones.
    fn apply_all(
        &self,
        run_id: &str,
        planned: &[Divergence],
        changes: &mut Vec<DivergenceChange>,
    ) -> ReconResult<()> {
        for divergence in planned {
            let upsert = self.store.upsert_in_run(divergence, Some(run_id))?;
            if let Some(transition) = upsert.transition {
                changes.push(DivergenceChange {
                    transition,
                    divergence: upsert.stored,
                });
            }
        }
        Ok(())
    }

    fn finish(&self, mut report: RunReport) -> ReconResult<RunReport> {
        report.finished_at = self.clock.now();
        if let Err(err) = self.store.record_run(&report) {
            log::error!("Run {}: could not record run ledger entry: {err}", report.run_id);
        }
        log::info!(
            "Run {}: {} succeeded, {} failed, {} divergences changed",
            report.run_id,
            report.succeeded,
            report.failed,
            report.changes.len()
        );
        Ok(report)
    }
}
