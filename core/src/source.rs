//! Upstream sources and their adapters.
//!
//! The engine talks to both upstreams through one capability,
//! `AggregateSource`. Each adapter wraps a client whose native grouping
//! differs: the internal system answers per accounting period, the
//! portal answers per applied rate. Adapters only flatten; summing into
//! a common key space is the bucketizer's job.

use crate::{
    error::FetchError,
    money::{MonetaryAmount, Rate},
    period::{Period, PeriodRange},
    types::EntityId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Internal,
    Portal,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Internal => "internal",
            SourceKind::Portal => "portal",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the upstream grouped the line a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    ByPeriod,
    ByRate,
}

/// One reported line, flattened. Several records may share a
/// (period, rate) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub entity: EntityId,
    pub source: SourceKind,
    pub grouping: Grouping,
    pub period: Period,
    pub rate: Rate,
    pub remuneration: MonetaryAmount,
    pub contribution: MonetaryAmount,
}

#[async_trait]
pub trait AggregateSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Aggregates for `entity` over the half-open `range`.
    async fn fetch_aggregates(
        &self,
        entity: &EntityId,
        range: PeriodRange,
    ) -> Result<Vec<AggregateRecord>, FetchError>;
}

// ── Internal system of record ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLine {
    pub rate: Rate,
    pub remuneration: MonetaryAmount,
    /// Absent when the system of record only books remuneration; the
    /// contribution is then remuneration x rate.
    #[serde(default)]
    pub contribution: Option<MonetaryAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodAggregate {
    pub period: Period,
    pub lines: Vec<RateLine>,
}

#[async_trait]
pub trait InternalSystemClient: Send + Sync {
    async fn aggregate_by_period(
        &self,
        entity: &EntityId,
        range: PeriodRange,
    ) -> Result<Vec<PeriodAggregate>, FetchError>;
}

pub struct InternalSystemSource<C> {
    client: C,
}

impl<C: InternalSystemClient> InternalSystemSource<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: InternalSystemClient> AggregateSource for InternalSystemSource<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::Internal
    }

    async fn fetch_aggregates(
        &self,
        entity: &EntityId,
        range: PeriodRange,
    ) -> Result<Vec<AggregateRecord>, FetchError> {
        let groups = self.client.aggregate_by_period(entity, range).await?;
        let mut records = Vec::new();
        for group in groups {
            for line in group.lines {
                let contribution = match line.contribution {
                    Some(c) => c,
                    None => line.remuneration.apply_rate(line.rate).map_err(|e| {
                        FetchError::Permanent(format!(
                            "cannot derive contribution for {entity} {}: {e}",
                            group.period
                        ))
                    })?,
                };
                records.push(AggregateRecord {
                    entity: entity.clone(),
                    source: SourceKind::Internal,
                    grouping: Grouping::ByPeriod,
                    period: group.period,
                    rate: line.rate,
                    remuneration: line.remuneration,
                    contribution,
                });
            }
        }
        Ok(records)
    }
}

// ── External portal ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodLine {
    pub period: Period,
    pub remuneration: MonetaryAmount,
    pub contribution: MonetaryAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateAggregate {
    pub rate: Rate,
    pub periods: Vec<PeriodLine>,
}

#[async_trait]
pub trait PortalClient: Send + Sync {
    async fn aggregate_by_rate(
        &self,
        entity: &EntityId,
        range: PeriodRange,
    ) -> Result<Vec<RateAggregate>, FetchError>;
}

pub struct ExternalPortalSource<C> {
    client: C,
}

impl<C: PortalClient> ExternalPortalSource<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: PortalClient> AggregateSource for ExternalPortalSource<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::Portal
    }

    async fn fetch_aggregates(
        &self,
        entity: &EntityId,
        range: PeriodRange,
    ) -> Result<Vec<AggregateRecord>, FetchError> {
        let groups = self.client.aggregate_by_rate(entity, range).await?;
        Ok(groups
            .into_iter()
            .flat_map(|group| {
                let rate = group.rate;
                group.periods.into_iter().map(move |line| (rate, line))
            })
            .map(|(rate, line)| AggregateRecord {
                entity: entity.clone(),
                source: SourceKind::Portal,
                grouping: Grouping::ByRate,
                period: line.period,
                rate,
                remuneration: line.remuneration,
                contribution: line.contribution,
            })
            .collect())
    }
}
