//! Progress reporting and cooperative cancellation.
//!
//! `ProgressInfo` is a cheap, cloneable handle passed down into solvers,
//! builders and step tasks. Log lines go to `tracing` and, when configured,
//! to a crossbeam channel so an embedding UI can display them. Cancellation
//! is a single externally-owned flag that is polled, never pushed: once
//! observed no new work is started, but in-flight work finishes undisturbed.

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Write-only progress sink plus cancellation query for one node run.
#[derive(Clone)]
pub struct ProgressInfo {
    prefix: String,
    cancelled: Arc<AtomicBool>,
    sink: Option<Sender<String>>,
}

impl ProgressInfo {
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            sink: None,
        }
    }

    /// Attach an externally-owned cancellation flag.
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Forward log lines to a channel in addition to `tracing`.
    /// Sends are non-blocking; a full or disconnected channel drops the line.
    pub fn with_sink(mut self, sink: Sender<String>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The shared cancellation flag.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Derive a sub-progress handle whose lines are prefixed with `scope`.
    pub fn resolve(&self, scope: &str) -> ProgressInfo {
        let prefix = if self.prefix.is_empty() {
            scope.to_string()
        } else {
            format!("{} / {}", self.prefix, scope)
        };
        ProgressInfo {
            prefix,
            cancelled: self.cancelled.clone(),
            sink: self.sink.clone(),
        }
    }

    /// Derive a sub-progress handle and immediately log its scope.
    pub fn resolve_and_log(&self, scope: &str) -> ProgressInfo {
        let resolved = self.resolve(scope);
        resolved.log("");
        resolved
    }

    /// Log one free-form line.
    pub fn log(&self, line: &str) {
        let rendered = if line.is_empty() {
            self.prefix.clone()
        } else if self.prefix.is_empty() {
            line.to_string()
        } else {
            format!("{}: {}", self.prefix, line)
        };
        tracing::info!(target: "stepflow", "{}", rendered);
        if let Some(sink) = &self.sink {
            let _ = sink.try_send(rendered);
        }
    }

    /// Log a warning line.
    pub fn warn(&self, line: &str) {
        let rendered = if self.prefix.is_empty() {
            line.to_string()
        } else {
            format!("{}: {}", self.prefix, line)
        };
        tracing::warn!(target: "stepflow", "{}", rendered);
        if let Some(sink) = &self.sink {
            let _ = sink.try_send(format!("[WARN] {}", rendered));
        }
    }
}

impl Default for ProgressInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressInfo")
            .field("prefix", &self.prefix)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
