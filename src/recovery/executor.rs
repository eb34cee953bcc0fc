//! Recovery executor
//!
//! Matches ledger anomalies to playbooks and runs them behind a two-layer
//! circuit breaker: a per-playbook cooldown (monotonic clock) and a cap on
//! consecutive failed runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::AutonomicConfig;
use crate::error::{AutonomicError, AutonomicResult};
use crate::health::{HealthLedger, HealthSignal};

use super::playbook::{builtin_playbooks, LogLevel, Playbook, PlaybookStep};
use super::step::{DryRunStepHandler, StepHandler};

/// Record of one attempted playbook run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub playbook_name: String,
    pub signal_id: Uuid,
    pub component: String,
    pub metric: String,
    /// Steps that completed before the run ended
    pub steps_executed: usize,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Breaker state for one playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookState {
    pub name: String,
    pub consecutive_failures: u32,
    pub max_retries: u32,
    /// Failure cap reached; the playbook is no longer selected
    pub disabled: bool,
    pub cooling_down: bool,
    pub cooldown_remaining_secs: f64,
    pub executions: u64,
}

/// Totals over the retained action history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub total_actions: usize,
    pub successful: usize,
    pub failed: usize,
    pub disabled_playbooks: Vec<String>,
}

#[derive(Debug, Default)]
struct PlaybookRuntime {
    last_execution: Option<Instant>,
    consecutive_failures: u32,
    executions: u64,
}

/// Runs playbooks against anomalies held in its ledger
pub struct RecoveryExecutor {
    ledger: HealthLedger,
    playbooks: Vec<Playbook>,
    handler: Arc<dyn StepHandler>,
    runtime: HashMap<String, PlaybookRuntime>,
    history: VecDeque<RecoveryAction>,
    history_limit: usize,
    anomaly_window_minutes: u64,
    shell_timeout: Duration,
}

impl RecoveryExecutor {
    /// Executor over `playbooks`, describing side effects without performing them
    pub fn new(ledger: HealthLedger, playbooks: Vec<Playbook>) -> Self {
        Self {
            ledger,
            playbooks,
            handler: Arc::new(DryRunStepHandler),
            runtime: HashMap::new(),
            history: VecDeque::new(),
            history_limit: 500,
            anomaly_window_minutes: 60,
            shell_timeout: Duration::from_secs(30),
        }
    }

    /// Executor with the built-in playbooks
    pub fn with_builtin_playbooks(ledger: HealthLedger) -> Self {
        Self::new(ledger, builtin_playbooks())
    }

    /// Build ledger and playbook list from configuration
    pub fn from_config(config: &AutonomicConfig, handler: Arc<dyn StepHandler>) -> Self {
        let mut playbooks = if config.recovery.include_builtin_playbooks {
            builtin_playbooks()
        } else {
            Vec::new()
        };
        playbooks.extend(config.recovery.playbooks.iter().cloned());

        Self::new(HealthLedger::new(config.ledger.max_signals), playbooks)
            .with_handler(handler)
            .with_history_limit(config.recovery.history_limit)
            .with_anomaly_window(config.ledger.anomaly_window_minutes)
            .with_shell_timeout(Duration::from_secs(config.recovery.shell_timeout_secs))
    }

    pub fn with_handler(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_anomaly_window(mut self, minutes: u64) -> Self {
        self.anomaly_window_minutes = minutes;
        self
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &HealthLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut HealthLedger {
        &mut self.ledger
    }

    /// Record a signal into the owned ledger
    pub fn record(&mut self, signal: HealthSignal) -> Uuid {
        self.ledger.record(signal)
    }

    pub fn playbooks(&self) -> &[Playbook] {
        &self.playbooks
    }

    /// Run matching playbooks for every current anomaly, in ledger order
    pub async fn evaluate_and_recover(&mut self) -> Vec<RecoveryAction> {
        let anomalies: Vec<HealthSignal> = self
            .ledger
            .get_anomalies(self.anomaly_window_minutes)
            .into_iter()
            .cloned()
            .collect();

        if anomalies.is_empty() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for signal in anomalies {
            let Some(index) = self.select_playbook(&signal) else {
                tracing::debug!("No eligible playbook for {}", signal.key());
                continue;
            };
            let playbook = self.playbooks[index].clone();

            let now = Instant::now();
            if self.cooldown_remaining(&playbook, now) > Duration::ZERO {
                tracing::debug!(
                    "Playbook '{}' cooling down, skipping {}",
                    playbook.name,
                    signal.key()
                );
                continue;
            }

            {
                let runtime = self.runtime.entry(playbook.name.clone()).or_default();
                runtime.last_execution = Some(now);
                runtime.executions += 1;
            }

            tracing::info!(
                "Running playbook '{}' for {} ({} > {})",
                playbook.name,
                signal.key(),
                signal.value,
                signal.threshold
            );

            let (steps_executed, result) = self.run_steps(&playbook, &signal).await;
            let duration_ms = now.elapsed().as_millis() as u64;

            let action = match result {
                Ok(()) => {
                    self.ledger.resolve(signal.id);
                    if let Some(runtime) = self.runtime.get_mut(&playbook.name) {
                        runtime.consecutive_failures = 0;
                    }
                    tracing::info!(
                        "Playbook '{}' resolved {} in {}ms",
                        playbook.name,
                        signal.key(),
                        duration_ms
                    );
                    RecoveryAction {
                        playbook_name: playbook.name.clone(),
                        signal_id: signal.id,
                        component: signal.component.clone(),
                        metric: signal.metric.clone(),
                        steps_executed,
                        success: true,
                        timestamp: Utc::now(),
                        error: None,
                        duration_ms,
                    }
                }
                Err(e) => {
                    let failures = match self.runtime.get_mut(&playbook.name) {
                        Some(runtime) => {
                            runtime.consecutive_failures += 1;
                            runtime.consecutive_failures
                        }
                        None => 1,
                    };
                    tracing::warn!(
                        "Playbook '{}' failed for {} after {} step(s): {} ({}/{} consecutive failures)",
                        playbook.name,
                        signal.key(),
                        steps_executed,
                        e,
                        failures,
                        playbook.max_retries
                    );
                    if failures >= playbook.max_retries {
                        tracing::error!(
                            "Playbook '{}' disabled after {} consecutive failures",
                            playbook.name,
                            failures
                        );
                    }
                    RecoveryAction {
                        playbook_name: playbook.name.clone(),
                        signal_id: signal.id,
                        component: signal.component.clone(),
                        metric: signal.metric.clone(),
                        steps_executed,
                        success: false,
                        timestamp: Utc::now(),
                        error: Some(e.to_string()),
                        duration_ms,
                    }
                }
            };

            self.push_history(action.clone());
            actions.push(action);
        }

        actions
    }

    /// First playbook in list order that matches and is under its failure cap
    fn select_playbook(&self, signal: &HealthSignal) -> Option<usize> {
        self.playbooks.iter().position(|p| {
            p.matches(&signal.component, &signal.metric, signal.severity)
                && self.consecutive_failures(&p.name) < p.max_retries
        })
    }

    fn consecutive_failures(&self, name: &str) -> u32 {
        self.runtime
            .get(name)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0)
    }

    fn cooldown_remaining(&self, playbook: &Playbook, now: Instant) -> Duration {
        let Some(last) = self
            .runtime
            .get(&playbook.name)
            .and_then(|r| r.last_execution)
        else {
            return Duration::ZERO;
        };
        cooldown_duration(playbook.cooldown_seconds).saturating_sub(now.duration_since(last))
    }

    /// Execute steps in order, stopping at the first failure
    async fn run_steps(
        &self,
        playbook: &Playbook,
        signal: &HealthSignal,
    ) -> (usize, AutonomicResult<()>) {
        for (index, step) in playbook.steps.iter().enumerate() {
            let step = step.render(signal);
            if let Err(e) = self.run_step(playbook, index, &step).await {
                return (
                    index,
                    Err(AutonomicError::StepFailed(step.action().to_string(), e.to_string())),
                );
            }
        }
        (playbook.steps.len(), Ok(()))
    }

    async fn run_step(
        &self,
        playbook: &Playbook,
        index: usize,
        step: &PlaybookStep,
    ) -> AutonomicResult<()> {
        tracing::debug!(
            "Playbook '{}' step {}: {}",
            playbook.name,
            index + 1,
            step.action()
        );
        match step {
            PlaybookStep::Log { message, level } => {
                match level {
                    LogLevel::Debug => tracing::debug!(playbook = %playbook.name, "{}", message),
                    LogLevel::Info => tracing::info!(playbook = %playbook.name, "{}", message),
                    LogLevel::Warning => tracing::warn!(playbook = %playbook.name, "{}", message),
                    LogLevel::Error => tracing::error!(playbook = %playbook.name, "{}", message),
                }
                Ok(())
            }
            PlaybookStep::Wait { seconds } => {
                let pause = cooldown_duration(*seconds);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                Ok(())
            }
            PlaybookStep::Shell {
                command,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.shell_timeout);
                self.handler.run_shell(command, timeout).await
            }
            PlaybookStep::ApiCall { method, url, body } => {
                self.handler.call_api(method, url, body.as_ref()).await
            }
            PlaybookStep::ConfigUpdate { key, value } => {
                self.handler.update_config(key, value).await
            }
            PlaybookStep::HealthCheck { target } => self.handler.health_check(target).await,
            PlaybookStep::Unknown => {
                tracing::warn!(
                    "Playbook '{}' step {} has an unrecognized action, skipping",
                    playbook.name,
                    index + 1
                );
                Ok(())
            }
        }
    }

    fn push_history(&mut self, action: RecoveryAction) {
        self.history.push_back(action);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Clear a playbook's failure count and cooldown clock
    pub fn reset_playbook(&mut self, name: &str) -> AutonomicResult<()> {
        if !self.playbooks.iter().any(|p| p.name == name) {
            return Err(AutonomicError::PlaybookNotFound(name.to_string()));
        }
        if let Some(runtime) = self.runtime.get_mut(name) {
            runtime.consecutive_failures = 0;
            runtime.last_execution = None;
        }
        tracing::info!("Playbook '{}' reset", name);
        Ok(())
    }

    /// Breaker state for every configured playbook, in list order
    pub fn playbook_states(&self) -> Vec<PlaybookState> {
        let now = Instant::now();
        self.playbooks
            .iter()
            .map(|p| {
                let runtime = self.runtime.get(&p.name);
                let consecutive_failures = runtime.map(|r| r.consecutive_failures).unwrap_or(0);
                let remaining = self.cooldown_remaining(p, now);
                PlaybookState {
                    name: p.name.clone(),
                    consecutive_failures,
                    max_retries: p.max_retries,
                    disabled: consecutive_failures >= p.max_retries,
                    cooling_down: remaining > Duration::ZERO,
                    cooldown_remaining_secs: remaining.as_secs_f64(),
                    executions: runtime.map(|r| r.executions).unwrap_or(0),
                }
            })
            .collect()
    }

    /// Every retained action, oldest first
    pub fn history(&self) -> impl Iterator<Item = &RecoveryAction> {
        self.history.iter()
    }

    /// The most recent `limit` actions, newest first
    pub fn recent_actions(&self, limit: usize) -> Vec<RecoveryAction> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> RecoveryStats {
        let successful = self.history.iter().filter(|a| a.success).count();
        RecoveryStats {
            total_actions: self.history.len(),
            successful,
            failed: self.history.len() - successful,
            disabled_playbooks: self
                .playbook_states()
                .into_iter()
                .filter(|s| s.disabled)
                .map(|s| s.name)
                .collect(),
        }
    }
}

/// Seconds from configuration as a Duration; negative or non-finite is zero
fn cooldown_duration(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}
