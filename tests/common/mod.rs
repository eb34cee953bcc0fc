//! Common test utilities
//!
//! Provides shared helpers for:
//! - Building signals
//! - A step handler that records calls and fails on demand
//! - A subsystem whose liveness and probe errors are scripted

#![allow(dead_code)]

use async_trait::async_trait;
use autonomic::{AutonomicError, AutonomicResult, HealthSignal, Severity, StepHandler, Subsystem};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn anomaly(component: &str, metric: &str, severity: Severity) -> HealthSignal {
    HealthSignal::new(component, metric, 10.0, 1.0, severity)
}

pub fn normal(component: &str, metric: &str) -> HealthSignal {
    HealthSignal::new(component, metric, 0.5, 1.0, Severity::Info)
}

/// Records every side effect as `"<action> <argument>"`; fails any call whose
/// argument contains one of `failing`
#[derive(Default)]
pub struct RecordingHandler {
    pub failing: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn failing(patterns: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: patterns.iter().map(|p| p.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, action: &str, argument: &str) -> AutonomicResult<()> {
        self.calls.lock().push(format!("{} {}", action, argument));
        if self.failing.iter().any(|f| argument.contains(f.as_str())) {
            return Err(AutonomicError::InternalError(format!("{} refused", argument)));
        }
        Ok(())
    }
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn run_shell(&self, command: &str, _timeout: Duration) -> AutonomicResult<()> {
        self.record("shell", command)
    }

    async fn call_api(
        &self,
        method: &str,
        url: &str,
        _body: Option<&serde_json::Value>,
    ) -> AutonomicResult<()> {
        self.record("api_call", &format!("{} {}", method, url))
    }

    async fn update_config(&self, key: &str, value: &serde_json::Value) -> AutonomicResult<()> {
        self.record("config_update", &format!("{}={}", key, value))
    }

    async fn health_check(&self, target: &str) -> AutonomicResult<()> {
        self.record("health_check", target)
    }
}

/// Subsystem with scripted liveness
pub struct ScriptedSubsystem {
    name: String,
    pub healthy: AtomicBool,
    /// Probe calls left that return an error
    pub probe_errors: AtomicU32,
    pub heals: AtomicU32,
}

impl ScriptedSubsystem {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            healthy: AtomicBool::new(true),
            probe_errors: AtomicU32::new(0),
            heals: AtomicU32::new(0),
        })
    }

    pub fn heal_count(&self) -> u32 {
        self.heals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subsystem for ScriptedSubsystem {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> AutonomicResult<bool> {
        let pending = self.probe_errors.load(Ordering::SeqCst);
        if pending > 0 {
            self.probe_errors.store(pending - 1, Ordering::SeqCst);
            return Err(AutonomicError::ProbeFailed(
                self.name.clone(),
                "probe timed out".to_string(),
            ));
        }
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn heal(&self) -> AutonomicResult<bool> {
        self.heals.fetch_add(1, Ordering::SeqCst);
        self.healthy.store(true, Ordering::SeqCst);
        Ok(true)
    }
}
