//! Collaborator interfaces driven by the heartbeat
//!
//! The heartbeat never owns remediation logic itself: subsystems know how to
//! probe and heal themselves, autonomous cycles are opaque jobs, and
//! telemetry sinks receive a per-beat report on a best-effort basis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::AutonomicResult;

/// How a subsystem restores itself
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealStrategy {
    /// Re-establish a connection (memory store, database)
    Reconnect,
    /// Reload state from disk (identity, prompts)
    Reload,
    /// Build the component again from configuration
    Reconstruct,
    /// Restart the component
    Restart,
}

impl std::fmt::Display for HealStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealStrategy::Reconnect => write!(f, "reconnect"),
            HealStrategy::Reload => write!(f, "reload"),
            HealStrategy::Reconstruct => write!(f, "reconstruct"),
            HealStrategy::Restart => write!(f, "restart"),
        }
    }
}

/// A dependency whose liveness the heartbeat samples
#[async_trait]
pub trait Subsystem: Send + Sync {
    fn name(&self) -> &str;

    fn heal_strategy(&self) -> HealStrategy {
        HealStrategy::Restart
    }

    /// Liveness probe. `Ok(false)` and `Err` both mark the subsystem unhealthy.
    async fn check(&self) -> AutonomicResult<bool>;

    /// Attempt to restore the subsystem; `Ok(true)` on success
    async fn heal(&self) -> AutonomicResult<bool>;
}

/// Secondary cycles run on multiples of the beat interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    GoalCheck,
    Reflection,
    Consolidation,
}

impl CycleKind {
    pub const ALL: [CycleKind; 3] = [
        CycleKind::GoalCheck,
        CycleKind::Reflection,
        CycleKind::Consolidation,
    ];
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleKind::GoalCheck => write!(f, "goal_check"),
            CycleKind::Reflection => write!(f, "reflection"),
            CycleKind::Consolidation => write!(f, "consolidation"),
        }
    }
}

/// An autonomous job such as goal work, reflection or memory consolidation
#[async_trait]
pub trait AutonomousCycle: Send + Sync {
    /// Run once, returning a short description of what happened
    async fn run(&self) -> AutonomicResult<String>;
}

/// Status published once per beat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatReport {
    pub beat: u64,
    pub timestamp: DateTime<Utc>,
    pub all_healthy: bool,
    /// Liveness per subsystem name
    pub subsystems: BTreeMap<String, bool>,
    pub consecutive_failures: u32,
}

/// Fire-and-forget destination for beat reports
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, report: &BeatReport) -> AutonomicResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(HealStrategy::Reconnect.to_string(), "reconnect");
        assert_eq!(CycleKind::GoalCheck.to_string(), "goal_check");
        assert_eq!(CycleKind::ALL.len(), 3);
    }

    #[test]
    fn test_report_serialization() {
        let mut subsystems = BTreeMap::new();
        subsystems.insert("memory".to_string(), false);
        let report = BeatReport {
            beat: 7,
            timestamp: Utc::now(),
            all_healthy: false,
            subsystems,
            consecutive_failures: 0,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["beat"], 7);
        assert_eq!(value["subsystems"]["memory"], false);
    }
}
