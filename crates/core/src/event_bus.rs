//! Billing event bus — trait for publishing billing lifecycle events.
//!
//! The billing engines accept an `Arc<dyn BillingEventSink>` and publish
//! payment failures, retry reschedules, escalations, and recoveries into it.
//! The alert triage engine is the production sink; tests use `CaptureSink`.

use std::sync::{Arc, Mutex};

use crate::types::{BillingEvent, BillingEventKind};

/// Trait for consuming billing lifecycle events.
pub trait BillingEventSink: Send + Sync {
    fn publish(&self, event: BillingEvent);
}

/// No-op sink for callers that don't need event delivery.
pub struct NoOpSink;

impl BillingEventSink for NoOpSink {
    fn publish(&self, _event: BillingEvent) {}
}

/// In-memory sink that captures events for test assertions.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<BillingEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<BillingEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_kind(&self, kind: BillingEventKind) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl BillingEventSink for CaptureSink {
    fn publish(&self, event: BillingEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience: a no-op event sink for engines that don't report events.
pub fn noop_sink() -> Arc<dyn BillingEventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
