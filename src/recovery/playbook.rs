//! Recovery playbooks
//!
//! A playbook is a declarative remediation: a trigger pattern, an ordered
//! list of typed steps, a cooldown and a retry cap. Playbooks are plain
//! values; the executor owns all runtime state about them.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::health::{HealthSignal, Severity};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

/// Log level for `log` steps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

/// One step of a playbook, tagged by its `action` field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlaybookStep {
    /// Emit a message
    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
    /// Suspend the run
    Wait { seconds: f64 },
    /// Run an external command
    Shell {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    /// Call an HTTP endpoint
    ApiCall {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
    /// Change a runtime configuration value
    ConfigUpdate {
        key: String,
        value: serde_json::Value,
    },
    /// Re-probe a named target
    HealthCheck { target: String },
    /// Any action this build does not know. Logged and skipped.
    #[serde(other)]
    Unknown,
}

fn default_method() -> String {
    "GET".to_string()
}

impl PlaybookStep {
    pub fn action(&self) -> &'static str {
        match self {
            PlaybookStep::Log { .. } => "log",
            PlaybookStep::Wait { .. } => "wait",
            PlaybookStep::Shell { .. } => "shell",
            PlaybookStep::ApiCall { .. } => "api_call",
            PlaybookStep::ConfigUpdate { .. } => "config_update",
            PlaybookStep::HealthCheck { .. } => "health_check",
            PlaybookStep::Unknown => "unknown",
        }
    }

    /// Copy of the step with placeholders filled from the signal
    pub fn render(&self, signal: &HealthSignal) -> PlaybookStep {
        match self {
            PlaybookStep::Log { message, level } => PlaybookStep::Log {
                message: substitute(message, signal),
                level: *level,
            },
            PlaybookStep::Wait { seconds } => PlaybookStep::Wait { seconds: *seconds },
            PlaybookStep::Shell {
                command,
                timeout_secs,
            } => PlaybookStep::Shell {
                command: substitute(command, signal),
                timeout_secs: *timeout_secs,
            },
            PlaybookStep::ApiCall { method, url, body } => PlaybookStep::ApiCall {
                method: method.clone(),
                url: substitute(url, signal),
                body: body.as_ref().map(|b| substitute_json(b, signal)),
            },
            PlaybookStep::ConfigUpdate { key, value } => PlaybookStep::ConfigUpdate {
                key: substitute(key, signal),
                value: substitute_json(value, signal),
            },
            PlaybookStep::HealthCheck { target } => PlaybookStep::HealthCheck {
                target: substitute(target, signal),
            },
            PlaybookStep::Unknown => PlaybookStep::Unknown,
        }
    }
}

/// Fill `{component}`, `{metric}`, `{value}` and `{threshold}`.
/// Any other `{name}` is left as written.
pub fn substitute(template: &str, signal: &HealthSignal) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "component" => signal.component.clone(),
            "metric" => signal.metric.clone(),
            "value" => signal.value.to_string(),
            "threshold" => signal.threshold.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

fn substitute_json(value: &serde_json::Value, signal: &HealthSignal) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(substitute(s, signal)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| substitute_json(v, signal)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_json(v, signal)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// A declarative recovery procedure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Playbook {
    /// Unique key; cooldown and retry state are tracked per name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Compared against "{component}.{metric}" by substring in either direction
    pub trigger_condition: String,

    #[serde(default)]
    pub steps: Vec<PlaybookStep>,

    /// Minimum seconds between two runs of this playbook
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: f64,

    /// Consecutive failed runs after which the playbook is no longer selected
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// If set, only signals with one of these severities trigger the playbook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_filter: Option<Vec<Severity>>,
}

fn default_cooldown() -> f64 {
    300.0
}

fn default_max_retries() -> u32 {
    3
}

impl Playbook {
    pub fn new(name: impl Into<String>, trigger_condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            trigger_condition: trigger_condition.into(),
            steps: Vec::new(),
            cooldown_seconds: default_cooldown(),
            max_retries: default_max_retries(),
            severity_filter: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: PlaybookStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_cooldown(mut self, seconds: f64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_severity_filter(mut self, severities: Vec<Severity>) -> Self {
        self.severity_filter = Some(severities);
        self
    }

    /// Whether this playbook applies to a signal
    ///
    /// Coarse triggers like `"database"` match every database metric, precise
    /// ones like `"database.connection_error"` match that key only (and any
    /// key that is itself a substring of the trigger).
    pub fn matches(&self, component: &str, metric: &str, severity: Severity) -> bool {
        let key = format!("{}.{}", component, metric);
        let trigger = self.trigger_condition.as_str();
        if !(key.contains(trigger) || trigger.contains(key.as_str())) {
            return false;
        }
        match &self.severity_filter {
            Some(allowed) => allowed.contains(&severity),
            None => true,
        }
    }
}

fn log_step(message: &str) -> PlaybookStep {
    PlaybookStep::Log {
        message: message.to_string(),
        level: LogLevel::Warning,
    }
}

/// The built-in playbook set, in selection order
pub fn builtin_playbooks() -> Vec<Playbook> {
    vec![
        Playbook::new("database_recovery", "database")
            .with_description("Reconnect the database pool after connection errors or timeouts")
            .with_step(log_step(
                "Database anomaly on {component}.{metric} ({value} > {threshold}), reconnecting",
            ))
            .with_step(PlaybookStep::Wait { seconds: 1.0 })
            .with_step(PlaybookStep::HealthCheck {
                target: "{component}".to_string(),
            })
            .with_cooldown(300.0)
            .with_max_retries(3),
        Playbook::new("memory_recovery", "memory")
            .with_description("Shrink consolidation batches and re-probe the memory store")
            .with_step(log_step("Memory store degraded ({metric} = {value}), reducing load"))
            .with_step(PlaybookStep::ConfigUpdate {
                key: "memory.consolidation_batch_size".to_string(),
                value: serde_json::json!(50),
            })
            .with_step(PlaybookStep::HealthCheck {
                target: "memory".to_string(),
            })
            .with_cooldown(600.0)
            .with_max_retries(3)
            .with_severity_filter(vec![Severity::Warning, Severity::Error, Severity::Critical]),
        Playbook::new("llm_recovery", "llm")
            .with_description("Back off and enable provider fallback on model errors")
            .with_step(log_step("LLM provider trouble ({metric} = {value}), backing off"))
            .with_step(PlaybookStep::Wait { seconds: 30.0 })
            .with_step(PlaybookStep::ConfigUpdate {
                key: "llm.fallback_enabled".to_string(),
                value: serde_json::json!(true),
            })
            .with_step(PlaybookStep::HealthCheck {
                target: "llm".to_string(),
            })
            .with_cooldown(300.0)
            .with_max_retries(5),
        Playbook::new("service_restart", "service.unresponsive")
            .with_description("Restart an unresponsive service")
            .with_step(log_step("Service {component} unresponsive, restarting"))
            .with_step(PlaybookStep::Shell {
                command: "systemctl restart {component}".to_string(),
                timeout_secs: Some(60),
            })
            .with_step(PlaybookStep::Wait { seconds: 5.0 })
            .with_step(PlaybookStep::HealthCheck {
                target: "{component}".to_string(),
            })
            .with_cooldown(900.0)
            .with_max_retries(2)
            .with_severity_filter(vec![Severity::Error, Severity::Critical]),
        Playbook::new("disk_cleanup", "disk_usage")
            .with_description("Purge stale temporary files when disk usage is high")
            .with_step(log_step("Disk usage {value}% over {threshold}%, purging temp files"))
            .with_step(PlaybookStep::Shell {
                command: "find /tmp -type f -mtime +7 -delete".to_string(),
                timeout_secs: Some(120),
            })
            .with_step(PlaybookStep::HealthCheck {
                target: "disk".to_string(),
            })
            .with_cooldown(3600.0)
            .with_max_retries(1),
        Playbook::new("high_latency", "latency")
            .with_description("Flush caches when response latency climbs")
            .with_step(log_step("Latency on {component} is {value}ms (limit {threshold}ms)"))
            .with_step(PlaybookStep::ApiCall {
                method: "POST".to_string(),
                url: "http://127.0.0.1:8080/internal/{component}/cache/flush".to_string(),
                body: None,
            })
            .with_cooldown(600.0)
            .with_max_retries(3)
            .with_severity_filter(vec![Severity::Warning, Severity::Error]),
    ]
}
