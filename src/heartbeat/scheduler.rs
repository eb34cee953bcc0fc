//! Heartbeat scheduler
//!
//! A single periodic loop that samples subsystem liveness, heals what is
//! down, feeds failures into diagnostics, and triggers the secondary
//! autonomous cycles on their own cadences. Beat failures are counted; too
//! many in a row trigger an emergency self-heal of every subsystem.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::HeartbeatConfig;
use crate::diagnostics::Diagnostics;
use crate::error::AutonomicError;
use crate::health::{HealthSignal, Severity};

use super::hooks::{AutonomousCycle, BeatReport, CycleKind, Subsystem, TelemetrySink};

/// Snapshot of the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub running: bool,
    pub healthy: bool,
    pub beat_count: u64,
    pub last_beat: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub emergency_heals: u64,
    pub interval_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<BeatReport>,
}

#[derive(Debug, Default)]
struct BeatState {
    beat_count: u64,
    last_beat: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    emergency_heals: u64,
    cycle_counters: HashMap<CycleKind, u32>,
    last_report: Option<BeatReport>,
}

/// Everything the loop task needs, cloned out of the handle at start
#[derive(Clone)]
struct BeatRunner {
    config: HeartbeatConfig,
    subsystems: Vec<Arc<dyn Subsystem>>,
    cycles: BTreeMap<CycleKind, Arc<dyn AutonomousCycle>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    diagnostics: Option<Arc<Diagnostics>>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<BeatState>>,
}

/// The periodic scheduler
pub struct Heartbeat {
    runner: BeatRunner,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            runner: BeatRunner {
                config,
                subsystems: Vec::new(),
                cycles: BTreeMap::new(),
                telemetry: None,
                diagnostics: None,
                running: Arc::new(AtomicBool::new(false)),
                state: Arc::new(Mutex::new(BeatState::default())),
            },
            task: Mutex::new(None),
        }
    }

    pub fn with_subsystem(mut self, subsystem: Arc<dyn Subsystem>) -> Self {
        self.runner.subsystems.push(subsystem);
        self
    }

    /// Register the job for a cycle kind, replacing any earlier one
    pub fn with_cycle(mut self, kind: CycleKind, cycle: Arc<dyn AutonomousCycle>) -> Self {
        self.runner.cycles.insert(kind, cycle);
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.runner.telemetry = Some(sink);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.runner.diagnostics = Some(diagnostics);
        self
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.runner.config
    }

    /// Launch the loop. Does nothing if it is already running.
    pub fn start(&self) {
        if self.runner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            "Starting heartbeat (interval: {}s, {} subsystems)",
            self.runner.config.interval_secs,
            self.runner.subsystems.len()
        );
        let runner = self.runner.clone();
        *self.task.lock() = Some(tokio::spawn(runner.run()));
    }

    /// Stop the loop and wait for the task to finish. Idempotent.
    pub async fn stop(&self) {
        let was_running = self.runner.running.swap(false, Ordering::SeqCst);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!("Heartbeat task ended abnormally: {}", e),
            }
        }
        if was_running {
            tracing::info!("Heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.runner.running.load(Ordering::SeqCst)
    }

    /// Running, has beaten at least once, and the last beat is under two intervals old
    pub fn is_healthy(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(last_beat) = self.runner.state.lock().last_beat else {
            return false;
        };
        let limit = self
            .runner
            .config
            .interval()
            .checked_mul(2)
            .unwrap_or(Duration::MAX);
        match Utc::now().signed_duration_since(last_beat).to_std() {
            Ok(age) => age < limit,
            // last beat in the future: wall clock stepped back
            Err(_) => true,
        }
    }

    pub fn status(&self) -> HeartbeatStatus {
        let healthy = self.is_healthy();
        let state = self.runner.state.lock();
        HeartbeatStatus {
            running: self.is_running(),
            healthy,
            beat_count: state.beat_count,
            last_beat: state.last_beat,
            consecutive_failures: state.consecutive_failures,
            emergency_heals: state.emergency_heals,
            interval_secs: self.runner.config.interval_secs,
            last_report: state.last_report.clone(),
        }
    }

    /// Run a single beat on the caller's task
    pub async fn beat_once(&self) {
        self.runner.beat().await;
    }

    #[cfg(test)]
    fn set_last_beat(&self, at: DateTime<Utc>) {
        self.runner.state.lock().last_beat = Some(at);
    }
}

impl BeatRunner {
    async fn run(self) {
        let interval = self.config.interval();
        while self.running.load(Ordering::SeqCst) {
            self.beat().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn beat(&self) {
        let beat = {
            let mut state = self.state.lock();
            state.last_beat = Some(Utc::now());
            state.beat_count += 1;
            state.beat_count
        };

        // Subsystem, telemetry and cycle errors are contained inside the body;
        // only a panic escapes it
        let reason = match AssertUnwindSafe(self.beat_body(beat)).catch_unwind().await {
            Ok(()) => {
                self.state.lock().consecutive_failures = 0;
                return;
            }
            Err(panic) => panic_message(panic.as_ref()),
        };

        let failures = {
            let mut state = self.state.lock();
            state.consecutive_failures += 1;
            state.consecutive_failures
        };
        tracing::warn!(
            "Beat {} failed ({}/{} consecutive): {}",
            beat,
            failures,
            self.config.max_consecutive_failures,
            reason
        );
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.record_failure(
                "heartbeat",
                "beat_failure",
                serde_json::json!({ "beat": beat, "error": reason }),
            );
        }

        if failures >= self.config.max_consecutive_failures {
            tracing::error!(
                "{} consecutive beat failures, running emergency self-heal",
                failures
            );
            self.emergency_heal().await;
            let mut state = self.state.lock();
            state.consecutive_failures = 0;
            state.emergency_heals += 1;
        }
    }

    async fn beat_body(&self, beat: u64) {
        let mut liveness = BTreeMap::new();
        for subsystem in &self.subsystems {
            let healthy = match subsystem.check().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    tracing::warn!("Liveness probe for '{}' errored: {}", subsystem.name(), e);
                    false
                }
            };
            liveness.insert(subsystem.name().to_string(), healthy);
        }
        let all_healthy = liveness.values().all(|healthy| *healthy);

        let report = BeatReport {
            beat,
            timestamp: Utc::now(),
            all_healthy,
            subsystems: liveness.clone(),
            consecutive_failures: self.state.lock().consecutive_failures,
        };
        if let Some(sink) = &self.telemetry {
            if let Err(e) = sink.publish(&report).await {
                tracing::debug!("Telemetry publish failed: {}", e);
            }
        }
        self.state.lock().last_report = Some(report);

        if all_healthy {
            tracing::debug!("Beat {}: all {} subsystems healthy", beat, liveness.len());
        } else {
            let unhealthy: Vec<&Arc<dyn Subsystem>> = self
                .subsystems
                .iter()
                .filter(|s| liveness.get(s.name()) == Some(&false))
                .collect();

            for subsystem in unhealthy {
                self.report_unhealthy(beat, subsystem.name()).await;
                self.heal(subsystem.as_ref()).await;
            }

            if self.config.recover_on_beat {
                if let Some(diagnostics) = &self.diagnostics {
                    let actions = diagnostics.evaluate_and_recover().await;
                    if !actions.is_empty() {
                        tracing::info!(
                            "Beat {}: {} recovery action(s), {} succeeded",
                            beat,
                            actions.len(),
                            actions.iter().filter(|a| a.success).count()
                        );
                    }
                }
            }
        }

        self.run_due_cycles().await;
    }

    async fn report_unhealthy(&self, beat: u64, name: &str) {
        tracing::warn!("Subsystem '{}' unhealthy", name);
        let Some(diagnostics) = &self.diagnostics else {
            return;
        };
        diagnostics
            .record_signal(
                HealthSignal::new(name, "liveness", 1.0, 0.0, Severity::Error)
                    .with_message(format!("{} failed its liveness probe", name)),
            )
            .await;
        diagnostics.record_failure(name, "unresponsive", serde_json::json!({ "beat": beat }));
    }

    /// Heal one subsystem, containing any failure
    async fn heal(&self, subsystem: &dyn Subsystem) -> bool {
        match subsystem.heal().await {
            Ok(true) => {
                tracing::info!(
                    "Healed '{}' ({})",
                    subsystem.name(),
                    subsystem.heal_strategy()
                );
                true
            }
            Ok(false) => {
                tracing::warn!(
                    "Heal of '{}' ({}) did not succeed",
                    subsystem.name(),
                    subsystem.heal_strategy()
                );
                false
            }
            Err(e) => {
                let err = AutonomicError::HealFailed(subsystem.name().to_string(), e.to_string());
                tracing::warn!("{}", err);
                false
            }
        }
    }

    async fn emergency_heal(&self) {
        let mut healed = 0;
        for subsystem in &self.subsystems {
            if self.heal(subsystem.as_ref()).await {
                healed += 1;
            }
        }
        tracing::error!(
            "Emergency self-heal finished: {}/{} subsystems healed",
            healed,
            self.subsystems.len()
        );
    }

    fn cadence(&self, kind: CycleKind) -> u32 {
        match kind {
            CycleKind::GoalCheck => self.config.goal_check_every,
            CycleKind::Reflection => self.config.reflection_every,
            CycleKind::Consolidation => self.config.consolidation_every,
        }
    }

    /// Advance every cycle counter; run the registered jobs whose counter hit its cadence
    async fn run_due_cycles(&self) {
        let due: Vec<(CycleKind, Arc<dyn AutonomousCycle>)> = {
            let mut state = self.state.lock();
            let mut due = Vec::new();
            for kind in CycleKind::ALL {
                let every = self.cadence(kind);
                if every == 0 {
                    continue;
                }
                let counter = state.cycle_counters.entry(kind).or_insert(0);
                *counter += 1;
                if *counter >= every {
                    *counter = 0;
                    if let Some(cycle) = self.cycles.get(&kind) {
                        due.push((kind, cycle.clone()));
                    }
                }
            }
            due
        };

        for (kind, cycle) in due {
            match cycle.run().await {
                Ok(summary) => tracing::info!("Cycle {} complete: {}", kind, summary),
                Err(e) => tracing::warn!("Cycle {} failed: {}", kind, e),
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutonomicResult;
    use crate::health::HealthLedger;
    use crate::patterns::FailurePatternStore;
    use crate::recovery::{Playbook, RecoveryExecutor};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Probe errors for the first `probe_errors` checks, then reports `healthy`
    struct TestSubsystem {
        name: String,
        probe_errors: AtomicU32,
        healthy: AtomicBool,
        heals: AtomicU32,
        heal_result: bool,
    }

    impl TestSubsystem {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                probe_errors: AtomicU32::new(0),
                healthy: AtomicBool::new(true),
                heals: AtomicU32::new(0),
                heal_result: true,
            })
        }
    }

    #[async_trait]
    impl Subsystem for TestSubsystem {
        fn name(&self) -> &str {
            &self.name
        }

        async fn check(&self) -> AutonomicResult<bool> {
            let remaining = self.probe_errors.load(Ordering::SeqCst);
            if remaining > 0 {
                self.probe_errors.store(remaining - 1, Ordering::SeqCst);
                return Err(AutonomicError::ProbeFailed(
                    self.name.clone(),
                    "connection refused".to_string(),
                ));
            }
            Ok(self.healthy.load(Ordering::SeqCst))
        }

        async fn heal(&self) -> AutonomicResult<bool> {
            self.heals.fetch_add(1, Ordering::SeqCst);
            if self.heal_result {
                self.healthy.store(true, Ordering::SeqCst);
            }
            Ok(self.heal_result)
        }
    }

    /// Always down; healing always errors
    struct Unhealable;

    #[async_trait]
    impl Subsystem for Unhealable {
        fn name(&self) -> &str {
            "identity"
        }

        async fn check(&self) -> AutonomicResult<bool> {
            Ok(false)
        }

        async fn heal(&self) -> AutonomicResult<bool> {
            Err(AutonomicError::InternalError("identity file missing".to_string()))
        }
    }

    struct CountingCycle(AtomicU32);

    #[async_trait]
    impl AutonomousCycle for CountingCycle {
        async fn run(&self) -> AutonomicResult<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("run {}", n))
        }
    }

    struct FailingCycle;

    #[async_trait]
    impl AutonomousCycle for FailingCycle {
        async fn run(&self) -> AutonomicResult<String> {
            Err(AutonomicError::CycleFailed(
                "reflection".to_string(),
                "model offline".to_string(),
            ))
        }
    }

    /// Panics on its first `n` runs
    struct PanickingCycle(AtomicU32);

    impl PanickingCycle {
        fn times(n: u32) -> Arc<Self> {
            Arc::new(Self(AtomicU32::new(n)))
        }
    }

    #[async_trait]
    impl AutonomousCycle for PanickingCycle {
        async fn run(&self) -> AutonomicResult<String> {
            let remaining = self.0.load(Ordering::SeqCst);
            if remaining > 0 {
                self.0.store(remaining - 1, Ordering::SeqCst);
                panic!("cycle exploded");
            }
            Ok("recovered".to_string())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl TelemetrySink for BrokenSink {
        async fn publish(&self, _report: &BeatReport) -> AutonomicResult<()> {
            Err(AutonomicError::TelemetryError("sink offline".to_string()))
        }
    }

    fn fast_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_secs: 0.05,
            max_consecutive_failures: 3,
            ..Default::default()
        }
    }

    async fn wait_for_beats(heartbeat: &Heartbeat, beats: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while heartbeat.status().beat_count < beats {
            assert!(
                tokio::time::Instant::now() < deadline,
                "heartbeat did not reach {} beats",
                beats
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_emergency_heal_after_consecutive_failures() {
        let subsystem = TestSubsystem::new("memory");

        let heartbeat = Heartbeat::new(fast_config())
            .with_subsystem(subsystem.clone())
            .with_cycle(CycleKind::GoalCheck, PanickingCycle::times(3));
        heartbeat.start();
        wait_for_beats(&heartbeat, 4).await;
        heartbeat.stop().await;

        let status = heartbeat.status();
        assert_eq!(status.emergency_heals, 1);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(subsystem.heals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_is_healthy_lifecycle() {
        let heartbeat = Heartbeat::new(fast_config());
        assert!(!heartbeat.is_healthy());

        heartbeat.start();
        wait_for_beats(&heartbeat, 1).await;
        assert!(heartbeat.is_healthy());

        heartbeat.set_last_beat(Utc::now() - chrono::Duration::milliseconds(150));
        assert!(!heartbeat.is_healthy());

        heartbeat.stop().await;
        assert!(!heartbeat.is_healthy());
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_still_beats() {
        let heartbeat = Heartbeat::new(HeartbeatConfig {
            interval_secs: 1e20,
            ..Default::default()
        });
        heartbeat.start();
        wait_for_beats(&heartbeat, 1).await;
        assert!(heartbeat.is_running());
        assert!(heartbeat.is_healthy());
        heartbeat.stop().await;

        let negative = Heartbeat::new(HeartbeatConfig {
            interval_secs: -1.0,
            ..Default::default()
        });
        negative.start();
        wait_for_beats(&negative, 1).await;
        assert!(negative.is_healthy());
        negative.stop().await;
    }

    #[tokio::test]
    async fn test_check_error_is_contained_to_its_subsystem() {
        let soul = TestSubsystem::new("soul");
        soul.probe_errors.store(1, Ordering::SeqCst);
        let memory = TestSubsystem::new("memory");
        memory.healthy.store(false, Ordering::SeqCst);
        let goal = Arc::new(CountingCycle(AtomicU32::new(0)));
        let diagnostics = Arc::new(Diagnostics::new(
            RecoveryExecutor::new(HealthLedger::new(10), Vec::new()),
            FailurePatternStore::new(10),
        ));

        let heartbeat = Heartbeat::new(HeartbeatConfig {
            goal_check_every: 1,
            ..fast_config()
        })
        .with_subsystem(soul.clone())
        .with_subsystem(memory.clone())
        .with_cycle(CycleKind::GoalCheck, goal.clone())
        .with_diagnostics(diagnostics.clone());
        heartbeat.beat_once().await;

        assert_eq!(soul.heals.load(Ordering::SeqCst), 1);
        assert_eq!(memory.heals.load(Ordering::SeqCst), 1);
        assert_eq!(goal.0.load(Ordering::SeqCst), 1);

        let status = heartbeat.status();
        assert_eq!(status.consecutive_failures, 0);
        let report = status.last_report.unwrap();
        assert_eq!(report.subsystems.get("soul"), Some(&false));

        let summary = diagnostics.ledger_summary().await;
        assert_eq!(summary.active_signals, 2);
        assert!(diagnostics
            .recurring_patterns(Some(1))
            .iter()
            .all(|p| p.error_type == "unresponsive"));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let heartbeat = Heartbeat::new(fast_config());
        heartbeat.stop().await;

        heartbeat.start();
        heartbeat.start();
        assert!(heartbeat.is_running());

        heartbeat.stop().await;
        heartbeat.stop().await;
        assert!(!heartbeat.is_running());
    }

    #[tokio::test]
    async fn test_unhealthy_subsystem_is_healed_and_reported() {
        let subsystem = TestSubsystem::new("memory");
        subsystem.healthy.store(false, Ordering::SeqCst);

        let executor = RecoveryExecutor::new(
            HealthLedger::new(50),
            vec![Playbook::new("memory_fix", "memory.liveness").with_cooldown(0.0)],
        );
        let diagnostics = Arc::new(Diagnostics::new(executor, FailurePatternStore::new(50)));

        let heartbeat = Heartbeat::new(fast_config())
            .with_subsystem(subsystem.clone())
            .with_diagnostics(diagnostics.clone());
        heartbeat.beat_once().await;

        assert_eq!(subsystem.heals.load(Ordering::SeqCst), 1);
        let stats = diagnostics.recovery_stats().await;
        assert_eq!(stats.successful, 1);
        assert_eq!(diagnostics.recurring_patterns(Some(1))[0].error_type, "unresponsive");

        let report = heartbeat.status().last_report.unwrap();
        assert!(!report.all_healthy);
        assert_eq!(report.subsystems.get("memory"), Some(&false));
    }

    #[tokio::test]
    async fn test_heal_failure_does_not_fail_beat() {
        let subsystem = Arc::new(TestSubsystem {
            name: "soul".to_string(),
            probe_errors: AtomicU32::new(0),
            healthy: AtomicBool::new(false),
            heals: AtomicU32::new(0),
            heal_result: false,
        });
        let heartbeat = Heartbeat::new(fast_config())
            .with_subsystem(subsystem.clone())
            .with_telemetry(Arc::new(BrokenSink));

        heartbeat.beat_once().await;
        heartbeat.beat_once().await;

        let status = heartbeat.status();
        assert_eq!(status.beat_count, 2);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(subsystem.heals.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_heal_error_is_contained() {
        let runner = Heartbeat::new(fast_config()).runner;
        assert!(!runner.heal(&Unhealable).await);

        let heartbeat = Heartbeat::new(fast_config()).with_subsystem(Arc::new(Unhealable));
        heartbeat.beat_once().await;
        heartbeat.beat_once().await;
        assert_eq!(heartbeat.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_cycles_follow_cadence() {
        let goal = Arc::new(CountingCycle(AtomicU32::new(0)));
        let consolidation = Arc::new(CountingCycle(AtomicU32::new(0)));
        let config = HeartbeatConfig {
            goal_check_every: 1,
            reflection_every: 2,
            consolidation_every: 3,
            ..fast_config()
        };
        let heartbeat = Heartbeat::new(config)
            .with_cycle(CycleKind::GoalCheck, goal.clone())
            .with_cycle(CycleKind::Reflection, Arc::new(FailingCycle))
            .with_cycle(CycleKind::Consolidation, consolidation.clone());

        for _ in 0..6 {
            heartbeat.beat_once().await;
        }

        assert_eq!(goal.0.load(Ordering::SeqCst), 6);
        assert_eq!(consolidation.0.load(Ordering::SeqCst), 2);
        assert_eq!(heartbeat.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_panic_in_beat_is_counted() {
        let heartbeat = Heartbeat::new(fast_config())
            .with_cycle(CycleKind::GoalCheck, PanickingCycle::times(u32::MAX));

        heartbeat.beat_once().await;
        heartbeat.beat_once().await;
        assert_eq!(heartbeat.status().consecutive_failures, 2);

        heartbeat.beat_once().await;
        let status = heartbeat.status();
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.emergency_heals, 1);
    }

    #[tokio::test]
    async fn test_beat_failures_journaled() {
        let subsystem = TestSubsystem::new("cognition");
        let diagnostics = Arc::new(Diagnostics::new(
            RecoveryExecutor::new(HealthLedger::new(10), Vec::new()),
            FailurePatternStore::new(10),
        ));
        let heartbeat = Heartbeat::new(fast_config())
            .with_subsystem(subsystem)
            .with_cycle(CycleKind::GoalCheck, PanickingCycle::times(1))
            .with_diagnostics(diagnostics.clone());

        heartbeat.beat_once().await;
        let patterns = diagnostics.recurring_patterns(Some(1));
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].component, "heartbeat");
        assert_eq!(patterns[0].error_type, "beat_failure");
    }
}
