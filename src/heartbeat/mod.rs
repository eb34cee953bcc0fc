//! Heartbeat Module
//!
//! Periodic liveness sampling, self-healing and scheduling of secondary
//! autonomous cycles.

pub mod hooks;
pub mod scheduler;

pub use hooks::{AutonomousCycle, BeatReport, CycleKind, HealStrategy, Subsystem, TelemetrySink};
pub use scheduler::{Heartbeat, HeartbeatStatus};
