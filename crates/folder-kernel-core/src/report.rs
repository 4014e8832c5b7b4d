//! Outbound error/telemetry collaborator.
//!
//! The kernel pushes two kinds of events outward: exceptions with a context
//! map, and free-text warnings. Delivery is best effort; nothing in the kernel
//! waits on or inspects the outcome.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

pub trait ErrorReporter: Send + Sync {
    fn report_exception(&self, error: &dyn std::error::Error, context: &BTreeMap<String, String>);

    fn report_warning(&self, message: &str);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report_exception(&self, error: &dyn std::error::Error, context: &BTreeMap<String, String>) {
        tracing::error!(error = %error, context = ?context, "kernel exception reported");
    }

    fn report_warning(&self, message: &str) {
        tracing::warn!(warning = message, "kernel warning reported");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedEvent {
    Exception { message: String, context: BTreeMap<String, String> },
    Warning(String),
}

/// Keeps every event in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<ReportedEvent>>,
}

impl MemoryReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ReportedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn exception_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ReportedEvent::Exception { .. }))
            .count()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.events().iter().filter(|event| matches!(event, ReportedEvent::Warning(_))).count()
    }

    fn push(&self, event: ReportedEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

impl ErrorReporter for MemoryReporter {
    fn report_exception(&self, error: &dyn std::error::Error, context: &BTreeMap<String, String>) {
        self.push(ReportedEvent::Exception { message: error.to_string(), context: context.clone() });
    }

    fn report_warning(&self, message: &str) {
        self.push(ReportedEvent::Warning(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn memory_reporter_keeps_events_in_order() {
        let reporter = MemoryReporter::new();
        let mut context = BTreeMap::new();
        context.insert("operation".to_string(), "undo".to_string());

        reporter.report_warning("rate limit tripped");
        reporter.report_exception(&Boom, &context);

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ReportedEvent::Warning("rate limit tripped".to_string()));
        assert_eq!(events[1], ReportedEvent::Exception { message: "boom".to_string(), context });
        assert_eq!(reporter.exception_count(), 1);
        assert_eq!(reporter.warning_count(), 1);
    }
}
