//! Failure pattern store
//!
//! A bounded journal of failures, aggregated by (component, error type), used
//! to surface recurring incidents and suggest preventive measures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Contexts kept per recurring pattern
const RECENT_CONTEXTS: usize = 5;

/// One recorded failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub component: String,
    pub error_type: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// A (component, error type) pair seen at least the requested number of times
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringPattern {
    pub component: String,
    pub error_type: String,
    pub count: u64,
    /// Up to five most recent contexts, oldest first
    pub recent_contexts: Vec<serde_json::Map<String, serde_json::Value>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Bounded failure journal with running per-pair counts
#[derive(Debug, Clone)]
pub struct FailurePatternStore {
    records: VecDeque<FailureRecord>,
    counts: HashMap<(String, String), u64>,
    max_records: usize,
}

impl Default for FailurePatternStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl FailurePatternStore {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            counts: HashMap::new(),
            max_records: max_records.max(1),
        }
    }

    /// Journal a failure. Objects are stored as the context map, any other
    /// non-null value is kept under `"value"`.
    pub fn record_failure(&mut self, component: &str, error_type: &str, context: serde_json::Value) {
        let context = match context {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let key = (component.to_string(), error_type.to_string());
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        tracing::debug!(
            "Failure recorded: {}/{} ({} occurrences)",
            component,
            error_type,
            count
        );

        self.records.push_back(FailureRecord {
            component: component.to_string(),
            error_type: error_type.to_string(),
            context,
            timestamp: Utc::now(),
        });

        if self.records.len() > self.max_records {
            if let Some(evicted) = self.records.pop_front() {
                let key = (evicted.component, evicted.error_type);
                if let Some(count) = self.counts.get_mut(&key) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.counts.remove(&key);
                    }
                }
            }
        }
    }

    /// Pairs with at least `min_occurrences` retained records, most frequent first
    pub fn get_recurring_patterns(&self, min_occurrences: u64) -> Vec<RecurringPattern> {
        let mut patterns: Vec<RecurringPattern> = self
            .counts
            .iter()
            .filter(|(_, count)| **count >= min_occurrences)
            .filter_map(|((component, error_type), &count)| {
                let matching: Vec<&FailureRecord> = self
                    .records
                    .iter()
                    .filter(|r| &r.component == component && &r.error_type == error_type)
                    .collect();
                let first = matching.first()?;
                let last = matching.last()?;
                let skip = matching.len().saturating_sub(RECENT_CONTEXTS);

                Some(RecurringPattern {
                    component: component.clone(),
                    error_type: error_type.clone(),
                    count,
                    recent_contexts: matching[skip..].iter().map(|r| r.context.clone()).collect(),
                    first_seen: first.timestamp,
                    last_seen: last.timestamp,
                })
            })
            .collect();

        patterns.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.component.cmp(&b.component))
                .then_with(|| a.error_type.cmp(&b.error_type))
        });
        patterns
    }

    /// Recurring patterns paired with prevention advice
    pub fn suggestions(&self, min_occurrences: u64) -> Vec<(RecurringPattern, String)> {
        self.get_recurring_patterns(min_occurrences)
            .into_iter()
            .map(|p| {
                let advice = suggest_prevention(&p);
                (p, advice)
            })
            .collect()
    }

    /// Retained occurrences of one pair
    pub fn total_for(&self, component: &str, error_type: &str) -> u64 {
        self.counts
            .get(&(component.to_string(), error_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn records(&self) -> impl Iterator<Item = &FailureRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.counts.clear();
    }
}

/// Canned advice for known failure kinds, a generic hint otherwise
pub fn suggest_prevention(pattern: &RecurringPattern) -> String {
    match (pattern.component.as_str(), pattern.error_type.as_str()) {
        ("database", "connection_error") => {
            "Enable connection pooling with health checks and reconnect with exponential backoff"
                .to_string()
        }
        ("database", "timeout") => {
            "Add indexes for slow queries, raise the statement timeout, or paginate large reads"
                .to_string()
        }
        ("llm", "model_error") => {
            "Configure a fallback model and validate prompts before sending them".to_string()
        }
        ("llm", "rate_limit") => {
            "Throttle requests, cache repeated completions, and spread load across providers"
                .to_string()
        }
        ("service", "unresponsive") => {
            "Add a liveness probe with automatic restart and review resource limits".to_string()
        }
        (component, error_type) => format!(
            "Investigate recurring '{}' failures in {} ({} occurrences); consider a dedicated playbook",
            error_type, component, pattern.count
        ),
    }
}
