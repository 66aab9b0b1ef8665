//! Processing clock: the only source of "now" for a reconciliation run.
//!
//! RULE: Engine code never calls `Utc::now()` directly. Everything that
//! depends on the date (the closed-period window, detection timestamps)
//! reads it from a `Clock`, so tests can pin the processing date.

use chrono::{DateTime, NaiveDate, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant (used in tests and replays).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedClock {
    pub instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    /// Midnight UTC on the given date. Returns None for an invalid date.
    pub fn at_date(year: i32, month: u32, day: u32) -> Option<Self> {
        let instant = NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(0, 0, 0)?
            .and_utc();
        Some(Self::new(instant))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}
