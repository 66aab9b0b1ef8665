//! Divergence records and their lifecycle.
//!
//! Lifecycle per identity:
//!   ABSENT -> OPEN        first detection
//!   OPEN -> OPEN          re-detected with different amounts
//!   OPEN -> RESOLVED      amounts back within tolerance
//!   RESOLVED -> OPEN      diverges again on a later run
//! Records are never deleted.

use crate::{
    bucket::{BucketKey, BucketTotals},
    money::{MonetaryAmount, Rate},
    period::Period,
    types::EntityId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DivergenceId {
    pub entity: EntityId,
    pub period: Period,
    pub rate: Rate,
}

impl DivergenceId {
    pub fn new(entity: impl Into<EntityId>, key: BucketKey) -> Self {
        Self {
            entity: entity.into(),
            period: key.period,
            rate: key.rate,
        }
    }

    pub fn key(&self) -> BucketKey {
        BucketKey {
            period: self.period,
            rate: self.rate,
        }
    }
}

impl fmt::Display for DivergenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity, self.period, self.rate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub id: DivergenceId,
    pub internal_remuneration: MonetaryAmount,
    pub internal_contribution: MonetaryAmount,
    pub portal_remuneration: MonetaryAmount,
    pub portal_contribution: MonetaryAmount,
    /// Portal contribution minus internal contribution, in minor units.
    pub contribution_difference: i64,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
}

impl Divergence {
    pub fn internal_totals(&self) -> BucketTotals {
        BucketTotals {
            remuneration: self.internal_remuneration,
            contribution: self.internal_contribution,
        }
    }

    pub fn portal_totals(&self) -> BucketTotals {
        BucketTotals {
            remuneration: self.portal_remuneration,
            contribution: self.portal_contribution,
        }
    }

    /// Equality on everything except `detected_at`. Two records with the
    /// same facts are the same record, whenever they were observed.
    pub fn same_facts(&self, other: &Divergence) -> bool {
        self.id == other.id
            && self.internal_remuneration == other.internal_remuneration
            && self.internal_contribution == other.internal_contribution
            && self.portal_remuneration == other.portal_remuneration
            && self.portal_contribution == other.portal_contribution
            && self.contribution_difference == other.contribution_difference
            && self.resolved == other.resolved
    }

    /// A resolved copy carrying the latest observed totals.
    pub fn resolved_with(
        &self,
        internal: BucketTotals,
        portal: BucketTotals,
        at: DateTime<Utc>,
    ) -> Divergence {
        Divergence {
            id: self.id.clone(),
            internal_remuneration: internal.remuneration,
            internal_contribution: internal.contribution,
            portal_remuneration: portal.remuneration,
            portal_contribution: portal.contribution,
            contribution_difference: portal
                .contribution
                .minor_units
                .saturating_sub(internal.contribution.minor_units),
            detected_at: at,
            resolved: true,
        }
    }
}

/// What a changed upsert did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Opened,
    Updated,
    Resolved,
    Reopened,
}

impl Transition {
    /// The transition that takes `previous` to `next`, or None when the
    /// facts are unchanged. A resolved record with nothing stored under its
    /// identity has nothing to resolve and is not a transition either.
    pub fn between(previous: Option<&Divergence>, next: &Divergence) -> Option<Transition> {
        match previous {
            None if next.resolved => None,
            None => Some(Transition::Opened),
            Some(prev) if prev.same_facts(next) => None,
            Some(prev) => Some(match (prev.resolved, next.resolved) {
                (false, true) => Transition::Resolved,
                (true, false) => Transition::Reopened,
                _ => Transition::Updated,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Opened => "opened",
            Transition::Updated => "updated",
            Transition::Resolved => "resolved",
            Transition::Reopened => "reopened",
        }
    }
}
