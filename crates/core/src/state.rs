//! Aggregation lifecycle state shared between the engine and persistence.

use crate::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a pool inside the aggregator.
///
/// `Qualified` is sticky: after alerting the machine stays silent until its
/// signals age out of the horizon, then re-accumulates under a new epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Accumulating,
    Qualified,
}

impl Phase {
    /// Stable lowercase name used in persistence and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Accumulating => "accumulating",
            Phase::Qualified => "qualified",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Phase::Idle),
            "accumulating" => Some(Phase::Accumulating),
            "qualified" => Some(Phase::Qualified),
            _ => None,
        }
    }
}

/// Durable view of a pool's aggregation state, persisted for warm restart.
///
/// The epoch must survive restarts: delivery keys embed it, and a machine
/// rebuilt at epoch zero could mint a key that was already delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub pool: Address,
    pub phase: Phase,
    pub epoch: u32,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_name_round_trip() {
        for phase in [Phase::Idle, Phase::Accumulating, Phase::Qualified] {
            assert_eq!(Phase::from_str_opt(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::from_str_opt("unknown"), None);
    }
}
