pub mod config;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod patterns;
pub mod recovery;
pub mod telemetry;

pub use config::AutonomicConfig;
pub use diagnostics::Diagnostics;
pub use error::{AutonomicError, AutonomicResult};
pub use health::{ComponentHealth, HealthLedger, HealthSignal, HealthStatus, LedgerSummary, Severity};
pub use heartbeat::{
    AutonomousCycle, BeatReport, CycleKind, HealStrategy, Heartbeat, HeartbeatStatus, Subsystem,
    TelemetrySink,
};
pub use patterns::{suggest_prevention, FailurePatternStore, FailureRecord, RecurringPattern};
pub use recovery::{
    builtin_playbooks, DryRunStepHandler, Playbook, PlaybookStep, RecoveryAction, RecoveryExecutor,
    StepHandler, SystemStepHandler,
};
pub use telemetry::{render_prometheus, TracingTelemetry};
