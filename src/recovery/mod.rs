//! Recovery Module
//!
//! Declarative playbooks and the circuit-breaker-gated executor that runs
//! them against ledger anomalies:
//! - Playbook definitions and the built-in set
//! - Typed steps with placeholder substitution
//! - Step handlers binding shell/HTTP/config/health-check side effects
//! - Cooldown and retry-cap bookkeeping per playbook

pub mod executor;
pub mod playbook;
pub mod step;

pub use executor::{PlaybookState, RecoveryAction, RecoveryExecutor, RecoveryStats};
pub use playbook::{builtin_playbooks, substitute, LogLevel, Playbook, PlaybookStep};
pub use step::{DryRunStepHandler, RuntimeOverrides, StepHandler, SystemStepHandler};
