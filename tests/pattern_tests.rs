use autonomic::{suggest_prevention, FailurePatternStore};
use serde_json::json;

#[test]
fn test_recurring_patterns_over_threshold() {
    let mut store = FailurePatternStore::default();
    for attempt in 0..4 {
        store.record_failure("database", "connection_error", json!({"attempt": attempt}));
    }
    store.record_failure("llm", "rate_limit", json!({}));
    store.record_failure("llm", "rate_limit", json!({}));

    let patterns = store.get_recurring_patterns(3);
    assert_eq!(patterns.len(), 1);
    let pattern = &patterns[0];
    assert_eq!(pattern.component, "database");
    assert_eq!(pattern.count, 4);
    assert_eq!(pattern.recent_contexts.len(), 4);
    assert_eq!(pattern.recent_contexts[3]["attempt"], json!(3));

    assert!(suggest_prevention(pattern).contains("connection pooling"));
}

#[test]
fn test_counts_follow_retained_records() {
    let mut store = FailurePatternStore::new(5);
    for _ in 0..5 {
        store.record_failure("service", "unresponsive", json!(null));
    }
    for _ in 0..3 {
        store.record_failure("disk", "full", json!({"mount": "/var"}));
    }

    assert_eq!(store.len(), 5);
    assert_eq!(store.total_for("service", "unresponsive"), 2);
    assert_eq!(store.total_for("disk", "full"), 3);

    let patterns = store.get_recurring_patterns(2);
    assert_eq!(patterns[0].component, "disk");
    assert_eq!(patterns[1].component, "service");
    assert!(patterns[1].recent_contexts.iter().all(|c| c.is_empty()));
}

#[test]
fn test_suggestions_cover_known_and_unknown_pairs() {
    let mut store = FailurePatternStore::default();
    store.record_failure("llm", "model_error", json!({}));
    store.record_failure("scheduler", "drift", json!({}));

    let suggestions = store.suggestions(1);
    assert_eq!(suggestions.len(), 2);
    for (pattern, advice) in &suggestions {
        assert!(!advice.is_empty());
        if pattern.component == "scheduler" {
            assert!(advice.contains("'drift'"));
        } else {
            assert!(advice.contains("fallback model"));
        }
    }
}
