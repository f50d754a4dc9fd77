//! Audit hook for lifecycle events.
//!
//! Durable lineage storage lives outside this crate; components only emit
//! events into whatever sink the embedding service installs.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Lifecycle action recorded by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Task accepted into the queue.
    Submit,
    /// Task passed admission control.
    Admit,
    /// Task handed to a worker.
    Assign,
    /// Executor started the task.
    Start,
    /// Task completed.
    Complete,
    /// Task failed.
    Fail,
    /// Task cancelled.
    Cancel,
    /// Worker created by cold start.
    Spawn,
    /// Worker retired.
    Retire,
    /// Budget moved between partitions.
    Reallocate,
    /// Partition allocation widened from unallocated headroom.
    Grow,
    /// Budget epoch rolled over.
    EpochReset,
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Entity the event is about (task, worker or partition).
    pub subject: String,
    /// Partition involved, if any.
    pub partition: Option<String>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Sink shared between components.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that forwards into a shared in-memory buffer the caller keeps a handle to.
#[derive(Clone)]
pub struct SharedMemoryAuditSink {
    inner: Arc<Mutex<InMemoryAuditSink>>,
}

impl SharedMemoryAuditSink {
    /// Create a shared sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryAuditSink::new(max_events))),
        }
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().events()
    }
}

impl AuditSink for SharedMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        self.inner.lock().record(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    subject: impl Into<String>,
    partition: Option<&str>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    let subject = subject.into();
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{subject}-{action:?}-{created_at_ms}").to_lowercase(),
        subject,
        partition: partition.map(str::to_string),
        action,
        created_at_ms,
        detail,
    }
}

/// Record into an optional shared sink.
pub(crate) fn emit(
    sink: Option<&SharedAuditSink>,
    subject: impl Into<String>,
    partition: Option<&str>,
    action: AuditAction,
    detail: Option<String>,
) {
    if let Some(sink) = sink {
        sink.lock()
            .record(build_audit_event(subject, partition, action, detail));
    }
}
