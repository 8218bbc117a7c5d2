//! Error reporting sink
//!
//! Batch operations (flush, shutdown, maintenance) must not stop at the first
//! failing storage. Failures are handed to an [`ErrorSink`] and the batch
//! moves on.

use parking_lot::Mutex;

use crate::error::StoreError;

/// Receives failures that are reported rather than propagated
pub trait ErrorSink: Send + Sync {
    fn report(&self, context: &str, err: &StoreError);
}

/// Logs every report at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, context: &str, err: &StoreError) {
        tracing::error!(context, error = %err, "repository operation failed");
    }
}

/// Keeps reports in memory (and logs them)
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    reports: Mutex<Vec<String>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `"<context>: <error>"` for every report so far
    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, context: &str, err: &StoreError) {
        tracing::error!(context, error = %err, "repository operation failed");
        self.reports.lock().push(format!("{}: {}", context, err));
    }
}
