//! Fixture-backed source clients.
//!
//! Both clients serve aggregates from memory, loaded from JSON files or
//! built in code, and can be scripted to fail: the first
//! `transient_failures` calls for an entity fail transiently, and
//! `permanent_failure` makes every call fail permanently. The runner uses
//! them to replay exported upstream data; tests use them as doubles.

use crate::{
    error::FetchError,
    money::{CurrencyCode, MonetaryAmount, Rate},
    period::{Period, PeriodRange},
    source::{
        InternalSystemClient, PeriodAggregate, PeriodLine, PortalClient, RateAggregate, RateLine,
    },
    types::EntityId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureScript {
    #[serde(default)]
    pub transient_failures: u32,
    #[serde(default)]
    pub permanent_failure: bool,
    /// Simulated round-trip time per call.
    #[serde(default)]
    pub latency_ms: u64,
}

// ── File formats ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InternalLineFile {
    rate_bps: u32,
    remuneration: i64,
    #[serde(default)]
    contribution: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InternalPeriodFile {
    period: Period,
    lines: Vec<InternalLineFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InternalEntityFile {
    #[serde(flatten)]
    script: FailureScript,
    periods: Vec<InternalPeriodFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InternalFile {
    currency: CurrencyCode,
    entities: BTreeMap<EntityId, InternalEntityFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortalLineFile {
    period: Period,
    remuneration: i64,
    contribution: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortalRateFile {
    rate_bps: u32,
    periods: Vec<PortalLineFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortalEntityFile {
    #[serde(flatten)]
    script: FailureScript,
    rates: Vec<PortalRateFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortalFile {
    currency: CurrencyCode,
    entities: BTreeMap<EntityId, PortalEntityFile>,
}

// ── Shared call bookkeeping ────────────────────────────────────────

#[derive(Default)]
struct CallLog {
    scripts: HashMap<EntityId, FailureScript>,
    calls: Mutex<HashMap<EntityId, u32>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl CallLog {
    /// Count the call, honour latency, and apply the failure script.
    async fn enter(&self, entity: &EntityId) -> Result<(), FetchError> {
        let call_no = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| FetchError::Permanent("fixture call log poisoned".into()))?;
            let n = calls.entry(entity.clone()).or_insert(0);
            *n += 1;
            *n
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let script = self.scripts.get(entity).cloned().unwrap_or_default();
        if script.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.latency_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if script.permanent_failure {
            return Err(FetchError::Permanent(format!("{entity}: rejected")));
        }
        if call_no <= script.transient_failures {
            return Err(FetchError::Transient(format!("{entity}: timed out (call {call_no})")));
        }
        Ok(())
    }

    fn calls(&self, entity: &str) -> u32 {
        self.calls
            .lock()
            .map(|c| c.get(entity).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.calls.lock().map(|c| c.values().sum()).unwrap_or(0)
    }
}

// ── Internal system client ─────────────────────────────────────────

#[derive(Default)]
pub struct FixtureInternalClient {
    data: BTreeMap<EntityId, BTreeMap<Period, Vec<RateLine>>>,
    log: CallLog,
}

impl FixtureInternalClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: InternalFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        let mut client = Self::new();
        for (entity, body) in file.entities {
            client.log.scripts.insert(entity.clone(), body.script);
            for p in body.periods {
                for line in p.lines {
                    client = client.with_line(
                        &entity,
                        p.period,
                        Rate::from_basis_points(line.rate_bps),
                        MonetaryAmount::new(line.remuneration, file.currency),
                        line.contribution
                            .map(|c| MonetaryAmount::new(c, file.currency)),
                    );
                }
            }
        }
        Ok(client)
    }

    pub fn with_line(
        mut self,
        entity: &str,
        period: Period,
        rate: Rate,
        remuneration: MonetaryAmount,
        contribution: Option<MonetaryAmount>,
    ) -> Self {
        self.data
            .entry(entity.to_string())
            .or_default()
            .entry(period)
            .or_default()
            .push(RateLine {
                rate,
                remuneration,
                contribution,
            });
        self
    }

    pub fn with_script(mut self, entity: &str, script: FailureScript) -> Self {
        self.log.scripts.insert(entity.to_string(), script);
        self
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.data.keys().cloned().collect()
    }

    pub fn calls(&self, entity: &str) -> u32 {
        self.log.calls(entity)
    }

    pub fn total_calls(&self) -> u32 {
        self.log.total_calls()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.log.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InternalSystemClient for FixtureInternalClient {
    async fn aggregate_by_period(
        &self,
        entity: &EntityId,
        range: PeriodRange,
    ) -> Result<Vec<PeriodAggregate>, FetchError> {
        self.log.enter(entity).await?;
        Ok(self
            .data
            .get(entity)
            .map(|periods| {
                periods
                    .iter()
                    .filter(|(period, _)| range.contains(period))
                    .map(|(period, lines)| PeriodAggregate {
                        period: *period,
                        lines: lines.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ── External portal client ─────────────────────────────────────────

#[derive(Default)]
pub struct FixturePortalClient {
    data: BTreeMap<EntityId, BTreeMap<Rate, Vec<PeriodLine>>>,
    log: CallLog,
}

impl FixturePortalClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: PortalFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        let mut client = Self::new();
        for (entity, body) in file.entities {
            client.log.scripts.insert(entity.clone(), body.script);
            for r in body.rates {
                for line in r.periods {
                    client = client.with_line(
                        &entity,
                        Rate::from_basis_points(r.rate_bps),
                        line.period,
                        MonetaryAmount::new(line.remuneration, file.currency),
                        MonetaryAmount::new(line.contribution, file.currency),
                    );
                }
            }
        }
        Ok(client)
    }

    pub fn with_line(
        mut self,
        entity: &str,
        rate: Rate,
        period: Period,
        remuneration: MonetaryAmount,
        contribution: MonetaryAmount,
    ) -> Self {
        self.data
            .entry(entity.to_string())
            .or_default()
            .entry(rate)
            .or_default()
            .push(PeriodLine {
                period,
                remuneration,
                contribution,
            });
        self
    }

    pub fn with_script(mut self, entity: &str, script: FailureScript) -> Self {
        self.log.scripts.insert(entity.to_string(), script);
        self
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.data.keys().cloned().collect()
    }

    pub fn calls(&self, entity: &str) -> u32 {
        self.log.calls(entity)
    }

    pub fn total_calls(&self) -> u32 {
        self.log.total_calls()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.log.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortalClient for FixturePortalClient {
    async fn aggregate_by_rate(
        &self,
        entity: &EntityId,
        range: PeriodRange,
    ) -> Result<Vec<RateAggregate>, FetchError> {
        self.log.enter(entity).await?;
        Ok(self
            .data
            .get(entity)
            .map(|rates| {
                rates
                    .iter()
                    .map(|(rate, lines)| RateAggregate {
                        rate: *rate,
                        periods: lines
                            .iter()
                            .filter(|l| range.contains(&l.period))
                            .cloned()
                            .collect(),
                    })
                    .filter(|group| !group.periods.is_empty())
                    .collect()
            })
            .unwrap_or_default())
    }
}
