//! Process-wide failure notification hook.
//!
//! At most one [`UncaughtFailureHandler`] is installed at a time. When a
//! handler is installed, failures on intercepted call paths (reserved key
//! violations, propagation failures, panics in fire-and-forget tasks) are
//! delivered to it instead of propagating to the caller or the pool.

mod handler;

#[cfg(test)]
pub use handler::MockUncaughtFailureHandler;
pub use handler::{
    CollectingFailureHandler, LoggingFailureHandler, RecordedFailure, UncaughtFailureHandler,
};

use crate::errors::TxContextError;
use parking_lot::RwLock;
use std::sync::Arc;

static FAILURE_HANDLER: RwLock<Option<Arc<dyn UncaughtFailureHandler>>> = RwLock::new(None);

/// Installs `handler`, or detaches the current one when `None`.
///
/// Returns the previously installed handler.
pub fn install(
    handler: Option<Arc<dyn UncaughtFailureHandler>>,
) -> Option<Arc<dyn UncaughtFailureHandler>> {
    std::mem::replace(&mut *FAILURE_HANDLER.write(), handler)
}

/// Returns the installed handler, if any.
pub fn installed() -> Option<Arc<dyn UncaughtFailureHandler>> {
    FAILURE_HANDLER.read().clone()
}

/// Returns true if a handler is installed.
pub fn is_installed() -> bool {
    FAILURE_HANDLER.read().is_some()
}

/// Delivers `error` to the installed handler.
///
/// Returns false, leaving the error with the caller, when no handler is
/// installed. The slot lock is released before the handler runs, so a
/// handler may itself call [`install`].
pub fn notify(call: &str, args: &[serde_json::Value], error: &TxContextError) -> bool {
    let Some(handler) = installed() else {
        return false;
    };
    handler.handle(call, args, error);
    true
}

/// Routes the outcome of an intercepted call.
///
/// On error the installed handler is notified and `fallback` supplies the
/// value the call returns instead. With no handler the error propagates.
///
/// # Errors
///
/// Returns the original error when no handler is installed.
pub fn route<T, E>(
    call: &str,
    args: &[serde_json::Value],
    result: Result<T, E>,
    fallback: impl FnOnce() -> T,
) -> Result<T, TxContextError>
where
    E: Into<TxContextError>,
{
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let err = err.into();
            if notify(call, args, &err) {
                Ok(fallback())
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ReservedKeyViolation;
    use crate::testing::exclusive_hooks;

    #[test]
    fn test_no_handler_by_default() {
        let _hooks = exclusive_hooks();
        install(None);
        assert!(!is_installed());
        assert!(!notify("call", &[], &TxContextError::Cancelled));
    }

    #[test]
    fn test_install_returns_previous() {
        let _hooks = exclusive_hooks();
        let first: Arc<dyn UncaughtFailureHandler> = Arc::new(CollectingFailureHandler::new());
        let second: Arc<dyn UncaughtFailureHandler> = Arc::new(LoggingFailureHandler::default());

        assert!(install(Some(first.clone())).is_none());
        let previous = install(Some(second)).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));

        assert!(install(None).is_some());
        assert!(!is_installed());
    }

    #[test]
    fn test_route_without_handler_propagates() {
        let _hooks = exclusive_hooks();
        install(None);

        let result: Result<(), _> = route(
            "put_metadata",
            &[],
            Err(ReservedKeyViolation::new("$k", "put_metadata")),
            || (),
        );
        assert!(result.unwrap_err().is_reserved_key());
    }

    #[test]
    fn test_route_with_handler_uses_fallback() {
        let _hooks = exclusive_hooks();
        let collector = Arc::new(CollectingFailureHandler::new());
        install(Some(collector.clone()));

        let result = route(
            "get_metadata",
            &[serde_json::json!("$k")],
            Err::<Option<serde_json::Value>, _>(ReservedKeyViolation::new("$k", "get_metadata")),
            || None,
        );

        install(None);
        assert_eq!(result.unwrap(), None);
        assert_eq!(collector.len(), 1);
        assert!(collector.failures()[0].reserved_key);
    }

    #[test]
    fn test_route_passes_success_through() {
        let _hooks = exclusive_hooks();
        let collector = Arc::new(CollectingFailureHandler::new());
        install(Some(collector.clone()));

        let result = route("get", &[], Ok::<_, TxContextError>(5), || 0);

        install(None);
        assert_eq!(result.unwrap(), 5);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_mock_handler_receives_call_identity() {
        let _hooks = exclusive_hooks();
        let mut mock = MockUncaughtFailureHandler::new();
        mock.expect_handle()
            .withf(|call, args, err| {
                call == "put_metadata"
                    && args.first() == Some(&serde_json::json!("$amazon.discoIdentifier"))
                    && err.is_reserved_key()
            })
            .times(1)
            .return_const(());
        install(Some(Arc::new(mock)));

        let violation = ReservedKeyViolation::new("$amazon.discoIdentifier", "put_metadata");
        let handled = notify(
            "put_metadata",
            &[serde_json::json!("$amazon.discoIdentifier")],
            &violation.into(),
        );

        // Dropping the mock on detach verifies the expectation.
        install(None);
        assert!(handled);
    }

    #[test]
    fn test_handler_may_detach_itself() {
        let _hooks = exclusive_hooks();
        install(Some(Arc::new(
            |_call: &str, _args: &[serde_json::Value], _err: &TxContextError| {
                install(None);
            },
        )));

        assert!(notify("call", &[], &TxContextError::Cancelled));
        assert!(!is_installed());
    }
}
