//! Comparator: decides whether two bucket totals agree.
//!
//! Tolerance is absolute, in minor units. A relative check would let a
//! large absolute error through on a large bucket.

use crate::{
    bucket::{BucketKey, BucketTotals},
    divergence::{Divergence, DivergenceId},
    error::{ReconError, ReconResult},
    money::MonetaryAmount,
    types::EntityId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Tolerance(u64);

impl Tolerance {
    pub const EXACT: Tolerance = Tolerance(0);

    pub fn new(minor_units: i64) -> ReconResult<Self> {
        u64::try_from(minor_units).map(Self).map_err(|_| {
            ReconError::InvalidConfig(format!("tolerance must be >= 0, got {minor_units}"))
        })
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Tolerance {
    type Error = ReconError;
    fn try_from(v: i64) -> ReconResult<Self> {
        Tolerance::new(v)
    }
}

impl From<Tolerance> for i64 {
    fn from(t: Tolerance) -> Self {
        i64::try_from(t.0).unwrap_or(i64::MAX)
    }
}

/// `|a - b| <= tolerance`.
pub fn is_close(a: &MonetaryAmount, b: &MonetaryAmount, tolerance: Tolerance) -> ReconResult<bool> {
    Ok(a.abs_diff(b)? <= tolerance.minor_units())
}

/// None when remuneration and contribution both agree within
/// `tolerance`; otherwise an open divergence for `entity`/`key`.
pub fn compare(
    entity: &EntityId,
    key: BucketKey,
    internal: &BucketTotals,
    portal: &BucketTotals,
    tolerance: Tolerance,
    detected_at: DateTime<Utc>,
) -> ReconResult<Option<Divergence>> {
    let remuneration_close = is_close(&internal.remuneration, &portal.remuneration, tolerance)?;
    let contribution_close = is_close(&internal.contribution, &portal.contribution, tolerance)?;
    if remuneration_close && contribution_close {
        return Ok(None);
    }

    let difference = portal.contribution.checked_sub(&internal.contribution)?;
    Ok(Some(Divergence {
        id: DivergenceId::new(entity.clone(), key),
        internal_remuneration: internal.remuneration,
        internal_contribution: internal.contribution,
        portal_remuneration: portal.remuneration,
        portal_contribution: portal.contribution,
        contribution_difference: difference.minor_units,
        detected_at,
        resolved: false,
    }))
}
