//! Testing utilities for code that propagates transaction contexts.
//!
//! This module provides:
//! - A probe recording the context each task observes
//! - A lock serialising tests that install failure handlers
//! - One-time test logging setup

mod probe;

pub use crate::hooks::{CollectingFailureHandler, RecordedFailure};
pub use probe::{ContextProbe, Observation};

use crate::config::LoggingConfig;
use crate::observability::init_logging;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Once;

static HOOKS: Mutex<()> = Mutex::new(());
static LOGGING: Once = Once::new();

/// Takes exclusive use of the process-wide failure handler slot.
///
/// Tests that install a handler, or that may trigger a notification,
/// hold the guard for their whole body so they do not observe each
/// other's handlers.
pub fn exclusive_hooks() -> MutexGuard<'static, ()> {
    HOOKS.lock()
}

/// Installs debug-level test logging once per process.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = init_logging(&LoggingConfig::new().with_filter("txcontext=debug"));
    });
}
