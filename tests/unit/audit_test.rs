//! Tests for audit sink

use prometheus_budget_scheduler::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("task1", Some("main"), AuditAction::Submit, Some("80".to_string()));
    sink.record(event);
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].subject, "task1");
    assert_eq!(events[0].partition.as_deref(), Some("main"));
    assert_eq!(events[0].action, AuditAction::Submit);
    assert_eq!(events[0].detail.as_deref(), Some("80"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    for subject in ["a", "b", "c"] {
        sink.record(build_audit_event(subject, None, AuditAction::Cancel, None));
    }
    let subjects: Vec<String> = sink.events().into_iter().map(|e| e.subject).collect();
    assert_eq!(subjects, vec!["b", "c"]);
}
