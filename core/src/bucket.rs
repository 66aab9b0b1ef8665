//! Bucketizer: normalizes both sources into the (period, rate) key space.

use crate::{
    error::ReconResult,
    money::{CurrencyCode, MonetaryAmount, Rate},
    period::Period,
    source::{AggregateRecord, SourceKind},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Join key between the two sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub period: Period,
    pub rate: Rate,
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.period, self.rate)
    }
}

/// Summed totals for one key on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTotals {
    pub remuneration: MonetaryAmount,
    pub contribution: MonetaryAmount,
}

impl BucketTotals {
    pub fn zero(currency: CurrencyCode) -> Self {
        Self {
            remuneration: MonetaryAmount::zero(currency),
            contribution: MonetaryAmount::zero(currency),
        }
    }

    fn absorb(&mut self, record: &AggregateRecord) -> ReconResult<()> {
        self.remuneration = self.remuneration.checked_add(&record.remuneration)?;
        self.contribution = self.contribution.checked_add(&record.contribution)?;
        Ok(())
    }
}

pub type Buckets = BTreeMap<BucketKey, BucketTotals>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideBuckets {
    pub internal: Buckets,
    pub portal: Buckets,
}

impl SideBuckets {
    pub fn side(&self, kind: SourceKind) -> &Buckets {
        match kind {
            SourceKind::Internal => &self.internal,
            SourceKind::Portal => &self.portal,
        }
    }

    /// Every key seen on either side, ascending.
    pub fn keys(&self) -> BTreeSet<BucketKey> {
        self.internal
            .keys()
            .chain(self.portal.keys())
            .copied()
            .collect()
    }

    /// Both sides for `key`. A side with no bucket counts as zero.
    pub fn pair(&self, key: &BucketKey, currency: CurrencyCode) -> (BucketTotals, BucketTotals) {
        let zero = BucketTotals::zero(currency);
        (
            self.internal.get(key).copied().unwrap_or(zero),
            self.portal.get(key).copied().unwrap_or(zero),
        )
    }
}

/// Sum records from both sources per (period, rate).
///
/// Every amount must be in `currency`; a stray currency is an error rather
/// than something silently converted.
pub fn bucketize(records: &[AggregateRecord], currency: CurrencyCode) -> ReconResult<SideBuckets> {
    let mut out = SideBuckets::default();
    for record in records {
        let key = BucketKey {
            period: record.period,
            rate: record.rate,
        };
        let side = match record.source {
            SourceKind::Internal => &mut out.internal,
            SourceKind::Portal => &mut out.portal,
        };
        side.entry(key)
            .or_insert_with(|| BucketTotals::zero(currency))
            .absorb(record)?;
    }
    Ok(out)
}
