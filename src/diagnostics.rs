//! Diagnostics
//!
//! Shared entry point to the ledger, the recovery executor and the failure
//! pattern store. The executor sits behind an async mutex held for the whole
//! playbook run, so concurrent callers of `evaluate_and_recover` are
//! serialized and signals recorded meanwhile wait for the run to finish.

use std::sync::Arc;
use uuid::Uuid;

use crate::config::AutonomicConfig;
use crate::error::AutonomicResult;
use crate::health::{ComponentHealth, HealthSignal, LedgerSummary};
use crate::patterns::{FailurePatternStore, RecurringPattern};
use crate::recovery::{PlaybookState, RecoveryAction, RecoveryExecutor, RecoveryStats, StepHandler};

pub struct Diagnostics {
    executor: tokio::sync::Mutex<RecoveryExecutor>,
    patterns: parking_lot::Mutex<FailurePatternStore>,
    min_occurrences: u64,
}

impl Diagnostics {
    pub fn new(executor: RecoveryExecutor, patterns: FailurePatternStore) -> Self {
        Self {
            executor: tokio::sync::Mutex::new(executor),
            patterns: parking_lot::Mutex::new(patterns),
            min_occurrences: 3,
        }
    }

    pub fn from_config(config: &AutonomicConfig, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            executor: tokio::sync::Mutex::new(RecoveryExecutor::from_config(config, handler)),
            patterns: parking_lot::Mutex::new(FailurePatternStore::new(config.patterns.max_records)),
            min_occurrences: config.patterns.min_occurrences,
        }
    }

    pub async fn record_signal(&self, signal: HealthSignal) -> Uuid {
        self.executor.lock().await.record(signal)
    }

    pub async fn evaluate_and_recover(&self) -> Vec<RecoveryAction> {
        self.executor.lock().await.evaluate_and_recover().await
    }

    pub fn record_failure(&self, component: &str, error_type: &str, context: serde_json::Value) {
        self.patterns
            .lock()
            .record_failure(component, error_type, context);
    }

    /// Recurring patterns at `min_occurrences`, or the configured default
    pub fn recurring_patterns(&self, min_occurrences: Option<u64>) -> Vec<RecurringPattern> {
        self.patterns
            .lock()
            .get_recurring_patterns(min_occurrences.unwrap_or(self.min_occurrences))
    }

    /// Recurring patterns at the configured threshold, with prevention advice
    pub fn suggestions(&self) -> Vec<(RecurringPattern, String)> {
        self.patterns.lock().suggestions(self.min_occurrences)
    }

    pub async fn ledger_summary(&self) -> LedgerSummary {
        self.executor.lock().await.ledger().get_summary()
    }

    pub async fn component_health(&self, component: &str) -> ComponentHealth {
        self.executor
            .lock()
            .await
            .ledger()
            .get_component_health(component)
    }

    pub async fn clear_resolved(&self, component: &str) -> usize {
        self.executor
            .lock()
            .await
            .ledger_mut()
            .clear_resolved(component)
    }

    pub async fn recovery_stats(&self) -> RecoveryStats {
        self.executor.lock().await.stats()
    }

    pub async fn playbook_states(&self) -> Vec<PlaybookState> {
        self.executor.lock().await.playbook_states()
    }

    pub async fn reset_playbook(&self, name: &str) -> AutonomicResult<()> {
        self.executor.lock().await.reset_playbook(name)
    }

    /// Run a closure against the executor while holding the lock
    pub async fn with_executor<R>(&self, f: impl FnOnce(&mut RecoveryExecutor) -> R) -> R {
        let mut executor = self.executor.lock().await;
        f(&mut executor)
    }
}
