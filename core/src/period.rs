//! Accounting periods and the closed-period window.
//!
//! A period is closed once it lies strictly before the month that
//! contains the processing date. Only closed periods are reconciled.

use crate::error::{ReconError, ReconResult};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar (year, month). Ordered by year, then month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> ReconResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(ReconError::InvalidPeriod(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    /// The period containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn pred(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// True once `today` has moved past this period's month.
    pub fn is_closed(&self, today: NaiveDate) -> bool {
        *self < Period::containing(today)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ReconError;

    fn from_str(s: &str) -> ReconResult<Self> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| ReconError::InvalidPeriod(s.to_string()))?;
        let year = y
            .parse::<i32>()
            .map_err(|_| ReconError::InvalidPeriod(s.to_string()))?;
        let month = m
            .parse::<u32>()
            .map_err(|_| ReconError::InvalidPeriod(s.to_string()))?;
        Period::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = ReconError;
    fn try_from(s: String) -> ReconResult<Self> {
        s.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

/// Half-open range of periods: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: Period,
    pub end: Period,
}

impl PeriodRange {
    pub fn contains(&self, period: &Period) -> bool {
        self.start <= *period && *period < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for PeriodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The last `n` closed periods as of `today`, oldest first.
/// `n <= 0` yields an empty window.
pub fn closed_periods_as_of(today: NaiveDate, n: i64) -> Vec<Period> {
    if n <= 0 {
        return Vec::new();
    }
    let mut periods = Vec::new();
    let mut cursor = Period::containing(today);
    for _ in 0..n {
        cursor = cursor.pred();
        periods.push(cursor);
    }
    periods.reverse();
    periods
}

/// The last `n` closed periods as of the current UTC date.
pub fn closed_periods(n: i64) -> Vec<Period> {
    closed_periods_as_of(Utc::now().date_naive(), n)
}

/// Smallest half-open range covering every period in `window`.
pub fn window_range(window: &[Period]) -> Option<PeriodRange> {
    let start = *window.iter().min()?;
    let end = window.iter().max()?.succ();
    Some(PeriodRange { start, end })
}
