//! Audit events appended for every changed divergence write.
//!
//! Variants are added over time and never removed or reordered, since
//! stored payloads must stay readable.

use crate::{divergence::Transition, types::RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DivergenceEvent {
    Opened {
        at: DateTime<Utc>,
        contribution_difference: i64,
    },
    Updated {
        at: DateTime<Utc>,
        previous_difference: i64,
        contribution_difference: i64,
    },
    Resolved {
        at: DateTime<Utc>,
        contribution_difference: i64,
    },
    Reopened {
        at: DateTime<Utc>,
        contribution_difference: i64,
    },
}

impl DivergenceEvent {
    pub fn for_transition(
        transition: Transition,
        at: DateTime<Utc>,
        previous_difference: Option<i64>,
        contribution_difference: i64,
    ) -> Self {
        match transition {
            Transition::Opened => DivergenceEvent::Opened { at, contribution_difference },
            Transition::Updated => DivergenceEvent::Updated {
                at,
                previous_difference: previous_difference.unwrap_or_default(),
                contribution_difference,
            },
            Transition::Resolved => DivergenceEvent::Resolved { at, contribution_difference },
            Transition::Reopened => DivergenceEvent::Reopened { at, contribution_difference },
        }
    }

    /// Stable name for the event_type column.
    pub fn event_type(&self) -> &'static str {
        match self {
            DivergenceEvent::Opened { .. } => "opened",
            DivergenceEvent::Updated { .. } => "updated",
            DivergenceEvent::Resolved { .. } => "resolved",
            DivergenceEvent::Reopened { .. } => "reopened",
        }
    }
}

/// One row of a divergence's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceLogEntry {
    pub id: Option<i64>,
    pub run_id: Option<RunId>,
    pub event_type: String,
    pub payload: String,
}
