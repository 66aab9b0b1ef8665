//! Run outcome: what changed, and which entities could not be reconciled.

use crate::{
    compare::Tolerance,
    divergence::{Divergence, Transition},
    period::Period,
    types::{EntityId, RunId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceChange {
    pub transition: Transition,
    pub divergence: Divergence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity: EntityId,
    pub reason: String,
    /// The failure was a transient upstream error that outlived its retries.
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub periods: Vec<Period>,
    pub tolerance: Tolerance,
    /// Divergences produced or updated by this run, in processing order.
    pub changes: Vec<DivergenceChange>,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<EntityFailure>,
}

impl RunReport {
    pub fn divergences(&self) -> impl Iterator<Item = &Divergence> {
        self.changes.iter().map(|c| &c.divergence)
    }

    pub fn count(&self, transition: Transition) -> usize {
        self.changes
            .iter()
            .filter(|c| c.transition == transition)
            .count()
    }

    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }

    pub fn failed_entities(&self) -> Vec<&EntityId> {
        self.failures.iter().map(|f| &f.entity).collect()
    }
}
