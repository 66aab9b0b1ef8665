//! Shared primitive types used across the entire engine.

/// A stable identifier for a reconciled entity (employer, account, ...).
pub type EntityId = String;

/// The canonical reconciliation run identifier.
pub type RunId = String;
