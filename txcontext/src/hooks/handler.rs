//! Failure handler trait and implementations.

use crate::errors::TxContextError;
use parking_lot::RwLock;
use tracing::{debug, error, warn, Level};

/// Receives failures raised on intercepted call paths.
///
/// Handlers run on whichever thread hit the failure and must not panic.
#[cfg_attr(test, mockall::automock)]
pub trait UncaughtFailureHandler: Send + Sync {
    /// Handles a failure.
    ///
    /// # Arguments
    ///
    /// * `call` - The logical call that failed (e.g. "put_metadata")
    /// * `args` - The call's arguments
    /// * `error` - The failure
    fn handle(&self, call: &str, args: &[serde_json::Value], error: &TxContextError);
}

impl<F> UncaughtFailureHandler for F
where
    F: Fn(&str, &[serde_json::Value], &TxContextError) + Send + Sync,
{
    fn handle(&self, call: &str, args: &[serde_json::Value], error: &TxContextError) {
        self(call, args, error);
    }
}

/// A handler that logs failures using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingFailureHandler {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingFailureHandler {
    fn default() -> Self {
        Self { level: Level::WARN }
    }
}

impl LoggingFailureHandler {
    /// Creates a new logging handler with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates an error-level logging handler.
    #[must_use]
    pub fn error() -> Self {
        Self::new(Level::ERROR)
    }
}

impl UncaughtFailureHandler for LoggingFailureHandler {
    fn handle(&self, call: &str, args: &[serde_json::Value], err: &TxContextError) {
        match self.level {
            Level::ERROR => {
                error!(call = %call, args = ?args, error = %err, "Uncaught failure in {}", call);
            }
            Level::WARN => {
                warn!(call = %call, args = ?args, error = %err, "Uncaught failure in {}", call);
            }
            _ => {
                debug!(call = %call, args = ?args, error = %err, "Uncaught failure in {}", call);
            }
        }
    }
}

/// A single failure recorded by [`CollectingFailureHandler`].
#[derive(Debug, Clone)]
pub struct RecordedFailure {
    /// The logical call that failed.
    pub call: String,
    /// The call's arguments.
    pub args: Vec<serde_json::Value>,
    /// The rendered error message.
    pub message: String,
    /// Whether the failure was a reserved key violation.
    pub reserved_key: bool,
    /// Whether the failure came from the propagation layer.
    pub propagation: bool,
}

/// A handler that records failures, for tests.
#[derive(Debug, Default)]
pub struct CollectingFailureHandler {
    failures: RwLock<Vec<RecordedFailure>>,
}

impl CollectingFailureHandler {
    /// Creates a new collecting handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded failures.
    #[must_use]
    pub fn failures(&self) -> Vec<RecordedFailure> {
        self.failures.read().clone()
    }

    /// Returns the number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.read().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.read().is_empty()
    }

    /// Returns failures recorded for `call`.
    #[must_use]
    pub fn failures_for(&self, call: &str) -> Vec<RecordedFailure> {
        self.failures
            .read()
            .iter()
            .filter(|f| f.call == call)
            .cloned()
            .collect()
    }

    /// Clears all recorded failures.
    pub fn clear(&self) {
        self.failures.write().clear();
    }
}

impl UncaughtFailureHandler for CollectingFailureHandler {
    fn handle(&self, call: &str, args: &[serde_json::Value], error: &TxContextError) {
        self.failures.write().push(RecordedFailure {
            call: call.to_string(),
            args: args.to_vec(),
            message: error.to_string(),
            reserved_key: error.is_reserved_key(),
            propagation: error.is_propagation(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ReservedKeyViolation;

    #[test]
    fn test_closure_handler() {
        let seen = RwLock::new(Vec::new());
        let handler = |call: &str, _args: &[serde_json::Value], _err: &TxContextError| {
            seen.write().push(call.to_string());
        };

        let err = TxContextError::from(ReservedKeyViolation::new("$k", "put_metadata"));
        handler.handle("put_metadata", &[], &err);

        assert_eq!(seen.read().as_slice(), ["put_metadata".to_string()]);
    }

    #[test]
    fn test_logging_handler() {
        let err = TxContextError::Cancelled;
        LoggingFailureHandler::default().handle("execute", &[], &err);
        LoggingFailureHandler::error().handle("execute", &[], &err);
        LoggingFailureHandler::new(Level::DEBUG).handle("execute", &[], &err);
        // Should not panic
    }

    #[test]
    fn test_collecting_handler() {
        let handler = CollectingFailureHandler::new();
        assert!(handler.is_empty());

        let err = TxContextError::from(ReservedKeyViolation::new("$k", "get_metadata"));
        handler.handle("get_metadata", &[serde_json::json!("$k")], &err);
        handler.handle("execute", &[], &TxContextError::TaskPanicked("boom".into()));

        assert_eq!(handler.len(), 2);
        let recorded = handler.failures_for("get_metadata");
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].reserved_key);
        assert_eq!(recorded[0].args, vec![serde_json::json!("$k")]);

        handler.clear();
        assert!(handler.is_empty());
    }
}
