//! Transactional reconciliation between an internal system of record and
//! an external portal.
//!
//! Closed periods are fetched from both upstreams under per-source
//! concurrency bounds with jittered retry, summed per (period, rate),
//! compared against an absolute tolerance, and the differences are kept
//! in an idempotent divergence store.

pub mod bucket;
pub mod cancel;
pub mod clock;
pub mod compare;
pub mod config;
pub mod divergence;
pub mod engine;
pub mod error;
pub mod event;
pub mod fixture;
pub mod gate;
pub mod money;
pub mod period;
pub mod report;
pub mod rng;
pub mod source;
pub mod store;
pub mod types;

pub use engine::ReconEngine;
pub use error::{FetchError, ReconError, ReconResult};
