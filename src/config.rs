//! Configuration
//!
//! Settings for the heartbeat, the health ledger, the recovery executor and
//! the failure pattern store. Every field has a serde default so a partial
//! TOML file (or none at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AutonomicError, AutonomicResult};
use crate::recovery::playbook::Playbook;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomicConfig {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub patterns: PatternStoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AutonomicConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(raw: &str) -> AutonomicResult<Self> {
        let config: AutonomicConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> AutonomicResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the scheduler and stores cannot work with
    pub fn validate(&self) -> AutonomicResult<()> {
        self.heartbeat.try_interval()?;
        if self.heartbeat.max_consecutive_failures == 0 {
            return Err(AutonomicError::ConfigError(
                "heartbeat.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.ledger.max_signals == 0 {
            return Err(AutonomicError::ConfigError(
                "ledger.max_signals must be at least 1".to_string(),
            ));
        }
        if self.patterns.max_records == 0 {
            return Err(AutonomicError::ConfigError(
                "patterns.max_records must be at least 1".to_string(),
            ));
        }
        for playbook in &self.recovery.playbooks {
            if playbook.name.trim().is_empty() {
                return Err(AutonomicError::ConfigError(
                    "recovery.playbooks entries need a name".to_string(),
                ));
            }
            if playbook.cooldown_seconds < 0.0 {
                return Err(AutonomicError::ConfigError(format!(
                    "playbook '{}' has a negative cooldown",
                    playbook.name
                )));
            }
        }
        Ok(())
    }
}

/// Heartbeat scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between beats
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,

    /// Consecutive beat failures before the emergency self-heal pass
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Run the goal check every N beats
    #[serde(default = "default_goal_check_every")]
    pub goal_check_every: u32,

    /// Run reflection every N beats
    #[serde(default = "default_reflection_every")]
    pub reflection_every: u32,

    /// Run memory consolidation every N beats
    #[serde(default = "default_consolidation_every")]
    pub consolidation_every: u32,

    /// Evaluate playbooks at the end of a beat that saw unhealthy subsystems
    #[serde(default = "default_true")]
    pub recover_on_beat: bool,
}

fn default_interval_secs() -> f64 {
    3600.0
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_goal_check_every() -> u32 {
    1
}

fn default_reflection_every() -> u32 {
    6
}

fn default_consolidation_every() -> u32 {
    24
}

fn default_true() -> bool {
    true
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            goal_check_every: default_goal_check_every(),
            reflection_every: default_reflection_every(),
            consolidation_every: default_consolidation_every(),
            recover_on_beat: true,
        }
    }
}

impl HeartbeatConfig {
    /// Beat interval; positive, and small enough that twice it is still a `Duration`
    pub fn try_interval(&self) -> AutonomicResult<Duration> {
        Duration::try_from_secs_f64(self.interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero() && interval.checked_mul(2).is_some())
            .ok_or_else(|| {
                AutonomicError::ConfigError(format!(
                    "heartbeat.interval_secs must be positive and representable, got {}",
                    self.interval_secs
                ))
            })
    }

    /// Beat interval, falling back to the default when `interval_secs` is unusable
    pub fn interval(&self) -> Duration {
        self.try_interval()
            .unwrap_or_else(|_| Duration::from_secs_f64(default_interval_secs()))
    }
}

/// Health ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Maximum number of signals retained
    #[serde(default = "default_max_signals")]
    pub max_signals: usize,

    /// Window used when the executor pulls anomalies (minutes)
    #[serde(default = "default_anomaly_window_minutes")]
    pub anomaly_window_minutes: u64,
}

fn default_max_signals() -> usize {
    1000
}

fn default_anomaly_window_minutes() -> u64 {
    60
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_signals: default_max_signals(),
            anomaly_window_minutes: default_anomaly_window_minutes(),
        }
    }
}

/// Recovery executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Only describe shell/api/config steps instead of performing them
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Timeout for shell steps without an explicit timeout (seconds)
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    /// Timeout for api_call steps (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Maximum recovery actions kept in history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Include the built-in playbooks ahead of the configured ones
    #[serde(default = "default_true")]
    pub include_builtin_playbooks: bool,

    /// Additional playbooks, evaluated after the built-in set
    #[serde(default)]
    pub playbooks: Vec<Playbook>,
}

fn default_shell_timeout() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    10
}

fn default_history_limit() -> usize {
    500
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            shell_timeout_secs: default_shell_timeout(),
            http_timeout_secs: default_http_timeout(),
            history_limit: default_history_limit(),
            include_builtin_playbooks: true,
            playbooks: Vec::new(),
        }
    }
}

/// Failure pattern store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStoreConfig {
    /// Maximum failure records retained
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Default occurrence threshold for recurring patterns
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: u64,
}

fn default_max_records() -> usize {
    10_000
}

fn default_min_occurrences() -> u64 {
    3
}

impl Default for PatternStoreConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            min_occurrences: default_min_occurrences(),
        }
    }
}

/// Logging settings for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "autonomic=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}
