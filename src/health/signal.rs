//! Health signals
//!
//! A single observation of one metric on one component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a health signal
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - no action needed
    #[default]
    Info,
    /// Warning - may need attention
    Warning,
    /// Error - automatic recovery attempted
    Error,
    /// Critical - requires attention
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One health observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSignal {
    /// Unique identifier, used to address the signal once it is in a ledger
    pub id: Uuid,

    /// Component identifier, e.g. "database"
    pub component: String,

    /// Metric name, e.g. "connection_error"
    pub metric: String,

    /// Observed value
    pub value: f64,

    /// Value above which the observation is anomalous
    pub threshold: f64,

    pub severity: Severity,

    /// When the observation was made
    pub timestamp: DateTime<Utc>,

    /// Human readable description
    pub message: String,

    /// Set by the recovery executor after a successful playbook run
    #[serde(default)]
    pub resolved: bool,
}

impl HealthSignal {
    /// Create a signal stamped now, with a derived message
    pub fn new(
        component: impl Into<String>,
        metric: impl Into<String>,
        value: f64,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        let component = component.into();
        let metric = metric.into();
        let message = format!(
            "{}.{} = {} (threshold {})",
            component, metric, value, threshold
        );
        Self {
            id: Uuid::new_v4(),
            component,
            metric,
            value,
            threshold,
            severity,
            timestamp: Utc::now(),
            message,
            resolved: false,
        }
    }

    /// Replace the derived message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Override the observation time
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Strictly above threshold; equality is not anomalous
    pub fn is_anomaly(&self) -> bool {
        self.value > self.threshold
    }

    /// "{component}.{metric}", the key playbook triggers are matched against
    pub fn key(&self) -> String {
        format!("{}.{}", self.component, self.metric)
    }
}
