//! Progress reporting for long-running unlock calls.
//!
//! Each call owns its own [`Progress`]; there is no global event bus, so
//! concurrent calls never see each other's events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// One progress update: percent complete (0-100) and a step label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub label: String,
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Per-call progress handle.
///
/// Percentages never go backwards: an emit below the last reported value is
/// raised to it, and anything above 100 is capped.
pub struct Progress {
    sink: Option<Arc<dyn ProgressSink>>,
    last: u8,
}

impl Progress {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink: Some(sink),
            last: 0,
        }
    }

    /// A handle that drops every event.
    pub fn none() -> Self {
        Self {
            sink: None,
            last: 0,
        }
    }

    pub fn emit(&mut self, percent: u8, label: &str) {
        let percent = percent.min(100).max(self.last);
        self.last = percent;
        if let Some(sink) = &self.sink {
            sink.report(ProgressEvent {
                percent,
                label: label.to_string(),
            });
        }
    }

    /// Map `done` out of `total` into the `[start, end]` band.
    pub fn emit_fraction(&mut self, start: u8, end: u8, done: usize, total: usize, label: &str) {
        let span = end.saturating_sub(start) as usize;
        let offset = if total == 0 {
            span
        } else {
            span * done.min(total) / total
        };
        self.emit(start.saturating_add(offset as u8), label);
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress::none()
    }
}

/// Cooperative cancellation signal shared between a caller and one call.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
