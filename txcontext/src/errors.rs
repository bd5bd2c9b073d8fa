//! Error types for transaction context propagation.
//!
//! Caller misuse (touching the reserved metadata namespace) and adapter
//! failures (a snapshot could not be installed or cleared) are kept as
//! separate types so handlers can tell a bug in the calling code from a bug
//! in the propagation layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for txcontext operations.
#[derive(Debug, Error)]
pub enum TxContextError {
    /// A reserved metadata key was read or written.
    #[error("{0}")]
    ReservedKey(#[from] ReservedKeyViolation),

    /// A snapshot could not be installed or cleared on the executing thread.
    #[error("{0}")]
    Propagation(#[from] PropagationFailure),

    /// A task body panicked while running on a pool thread.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The task was dropped before it ever ran.
    #[error("Task cancelled before execution")]
    Cancelled,

    /// The host pool could not be built.
    #[error("Pool error: {0}")]
    Pool(String),
}

impl TxContextError {
    /// Builds a `TaskPanicked` error from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        Self::TaskPanicked(panic_message(payload))
    }

    /// Returns true if this is a reserved key violation.
    #[must_use]
    pub fn is_reserved_key(&self) -> bool {
        matches!(self, Self::ReservedKey(_))
    }

    /// Returns true if this is a propagation failure.
    #[must_use]
    pub fn is_propagation(&self) -> bool {
        matches!(self, Self::Propagation(_))
    }

    /// Converts to a dictionary representation for diagnostics.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        match self {
            Self::ReservedKey(violation) => violation.to_dict(),
            Self::Propagation(failure) => failure.to_dict(),
            other => {
                let kind = match other {
                    Self::TaskPanicked(_) => "task_panicked",
                    Self::Cancelled => "cancelled",
                    _ => "pool",
                };
                let mut map = HashMap::new();
                map.insert("error_type".to_string(), serde_json::json!(kind));
                map.insert("message".to_string(), serde_json::json!(other.to_string()));
                map
            }
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Error raised when a caller reads or writes a reserved metadata key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Metadata key '{key}' is in the reserved namespace and cannot be used by {operation}")]
pub struct ReservedKeyViolation {
    /// The offending key.
    pub key: String,
    /// The operation that was attempted (e.g. "put_metadata").
    pub operation: String,
}

impl ReservedKeyViolation {
    /// Creates a new reserved key violation.
    #[must_use]
    pub fn new(key: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operation: operation.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("error_type".to_string(), serde_json::json!("reserved_key"));
        map.insert("key".to_string(), serde_json::json!(&self.key));
        map.insert("operation".to_string(), serde_json::json!(&self.operation));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// The adapter phase in which a propagation failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationPhase {
    /// Copying the submitting thread's context.
    Capture,
    /// Writing the snapshot into the executing thread's store.
    Install,
    /// Resetting the executing thread's store after the body ran.
    Clear,
}

impl fmt::Display for PropagationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => write!(f, "capture"),
            Self::Install => write!(f, "install"),
            Self::Clear => write!(f, "clear"),
        }
    }
}

/// Error raised when an adapter cannot capture, install or clear a context.
///
/// This indicates a defect in the propagation layer, never caller misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Context propagation failed during {phase}: {message}")]
pub struct PropagationFailure {
    /// The phase that failed.
    pub phase: PropagationPhase,
    /// Description of the failure.
    pub message: String,
}

impl PropagationFailure {
    /// Creates a new propagation failure.
    #[must_use]
    pub fn new(phase: PropagationPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("error_type".to_string(), serde_json::json!("propagation"));
        map.insert("phase".to_string(), serde_json::json!(self.phase));
        map.insert("message".to_string(), serde_json::json!(&self.message));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_key_violation_message() {
        let err = ReservedKeyViolation::new("$internal.id", "put_metadata");
        let msg = err.to_string();
        assert!(msg.contains("$internal.id"));
        assert!(msg.contains("put_metadata"));
    }

    #[test]
    fn test_reserved_key_violation_to_dict() {
        let err = ReservedKeyViolation::new("$x", "get_metadata");
        let dict = err.to_dict();
        assert_eq!(dict["error_type"], serde_json::json!("reserved_key"));
        assert_eq!(dict["key"], serde_json::json!("$x"));
        assert_eq!(dict["operation"], serde_json::json!("get_metadata"));
    }

    #[test]
    fn test_propagation_failure_to_dict() {
        let err = PropagationFailure::new(PropagationPhase::Install, "store unavailable");
        let dict = err.to_dict();
        assert_eq!(dict["phase"], serde_json::json!("install"));
        assert!(err.to_string().contains("during install"));
    }

    #[test]
    fn test_error_conversion() {
        let err: TxContextError = ReservedKeyViolation::new("$k", "put_metadata").into();
        assert!(err.is_reserved_key());
        assert!(!err.is_propagation());

        let err: TxContextError =
            PropagationFailure::new(PropagationPhase::Clear, "borrowed").into();
        assert!(err.is_propagation());
    }

    #[test]
    fn test_from_panic_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static message");
        let err = TxContextError::from_panic(boxed.as_ref());
        assert_eq!(err.to_string(), "Task panicked: static message");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let err = TxContextError::from_panic(boxed.as_ref());
        assert_eq!(err.to_string(), "Task panicked: owned");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        let err = TxContextError::from_panic(boxed.as_ref());
        assert!(matches!(err, TxContextError::TaskPanicked(_)));
    }

    #[test]
    fn test_other_errors_to_dict() {
        let dict = TxContextError::Cancelled.to_dict();
        assert_eq!(dict["error_type"], serde_json::json!("cancelled"));

        let dict = TxContextError::TaskPanicked("boom".into()).to_dict();
        assert_eq!(dict["error_type"], serde_json::json!("task_panicked"));
    }
}
