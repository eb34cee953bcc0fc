//! Health ledger
//!
//! Bounded, insertion-ordered store of health signals with anomaly and
//! summary queries. Capacity is fixed; recording past it evicts the oldest
//! signal.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use super::signal::{HealthSignal, Severity};

/// Status derived from the worst unresolved severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
    Critical,
    /// No signals have ever been seen for the component
    Unknown,
}

impl HealthStatus {
    fn from_worst(worst: Severity) -> Self {
        match worst {
            Severity::Critical => HealthStatus::Critical,
            Severity::Error => HealthStatus::Error,
            Severity::Warning => HealthStatus::Warning,
            Severity::Info => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Error => write!(f, "error"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health summary for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    /// Signals currently held for the component
    pub signal_count: usize,
    /// Unresolved signals
    pub active_count: usize,
    /// Worst severity among unresolved signals, Info if none
    pub worst_severity: Severity,
}

/// Ledger-wide summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub status: HealthStatus,
    pub total_signals: usize,
    pub active_signals: usize,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Bounded store of health signals
#[derive(Debug, Clone)]
pub struct HealthLedger {
    signals: VecDeque<HealthSignal>,
    max_signals: usize,
}

impl Default for HealthLedger {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl HealthLedger {
    /// Create a ledger holding at most `max_signals` entries (minimum 1)
    pub fn new(max_signals: usize) -> Self {
        let max_signals = max_signals.max(1);
        Self {
            signals: VecDeque::with_capacity(max_signals),
            max_signals,
        }
    }

    /// Append a signal, evicting the oldest one when over capacity
    pub fn record(&mut self, signal: HealthSignal) -> Uuid {
        let id = signal.id;
        tracing::debug!(
            component = %signal.component,
            metric = %signal.metric,
            severity = %signal.severity,
            "Recording health signal: {}",
            signal.message
        );
        self.signals.push_back(signal);
        if self.signals.len() > self.max_signals {
            self.signals.pop_front();
        }
        id
    }

    /// Unresolved anomalies no older than `window_minutes`, in insertion order
    pub fn get_anomalies(&self, window_minutes: u64) -> Vec<&HealthSignal> {
        // Windows too large to represent cover the whole ledger
        let cutoff = i64::try_from(window_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|window| Utc::now().checked_sub_signed(window));
        self.signals
            .iter()
            .filter(|s| s.is_anomaly() && !s.resolved)
            .filter(|s| cutoff.map_or(true, |c| s.timestamp >= c))
            .collect()
    }

    /// Summary for a single component
    pub fn get_component_health(&self, component: &str) -> ComponentHealth {
        let mut signal_count = 0;
        let mut active_count = 0;
        let mut worst = Severity::Info;

        for signal in self.signals.iter().filter(|s| s.component == component) {
            signal_count += 1;
            if !signal.resolved {
                active_count += 1;
                worst = worst.max(signal.severity);
            }
        }

        let status = if signal_count == 0 {
            HealthStatus::Unknown
        } else {
            HealthStatus::from_worst(worst)
        };

        ComponentHealth {
            component: component.to_string(),
            status,
            signal_count,
            active_count,
            worst_severity: worst,
        }
    }

    /// Summary across every component currently held
    pub fn get_summary(&self) -> LedgerSummary {
        let mut components: BTreeMap<String, ComponentHealth> = BTreeMap::new();
        let mut active_signals = 0;
        let mut worst = Severity::Info;

        for signal in &self.signals {
            let health = components
                .entry(signal.component.clone())
                .or_insert_with(|| ComponentHealth {
                    component: signal.component.clone(),
                    status: HealthStatus::Healthy,
                    signal_count: 0,
                    active_count: 0,
                    worst_severity: Severity::Info,
                });
            health.signal_count += 1;
            if !signal.resolved {
                health.active_count += 1;
                health.worst_severity = health.worst_severity.max(signal.severity);
                active_signals += 1;
                worst = worst.max(signal.severity);
            }
        }
        for health in components.values_mut() {
            health.status = HealthStatus::from_worst(health.worst_severity);
        }

        LedgerSummary {
            status: HealthStatus::from_worst(worst),
            total_signals: self.signals.len(),
            active_signals,
            components,
        }
    }

    /// Drop resolved signals for one component, returning how many were removed
    pub fn clear_resolved(&mut self, component: &str) -> usize {
        let before = self.signals.len();
        self.signals
            .retain(|s| !(s.resolved && s.component == component));
        before - self.signals.len()
    }

    /// Mark a stored signal resolved. Returns false if it was already evicted.
    pub fn resolve(&mut self, id: Uuid) -> bool {
        match self.signals.iter_mut().find(|s| s.id == id) {
            Some(signal) => {
                signal.resolved = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&HealthSignal> {
        self.signals.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HealthSignal> {
        self.signals.iter()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_signals
    }
}
