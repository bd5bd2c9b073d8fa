//! Capture, install and clear around a single task.

use crate::context::{try_capture, try_exchange, try_replace, ContextSnapshot};
use crate::errors::{PropagationFailure, PropagationPhase, TxContextError};
use crate::hooks;
use std::cell::Cell;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use tracing::{debug, error, trace, warn};

thread_local! {
    // Number of adapters currently installed on this thread.
    static INSTALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A snapshot installed on the current thread.
///
/// Created by [`install`] right before a task body runs. Finishing or
/// dropping it (including during a panic unwind) resets the thread: a pool
/// worker is cleared to the empty context, while a thread that was already
/// running a task of its own gets that task's context back.
#[derive(Debug)]
pub struct InstalledContext {
    displaced: Option<ContextSnapshot>,
    identifier: String,
    finished: bool,
    _thread_bound: PhantomData<*const ()>,
}

/// Installs `snapshot` on the current thread, replacing its context.
///
/// `origin` is the thread that captured the snapshot. When the task runs on
/// that same thread, or inside another installed task, the displaced context
/// is restored on exit instead of cleared.
///
/// # Errors
///
/// Returns `PropagationFailure` if the thread-local store is unavailable.
pub fn install(
    mut snapshot: ContextSnapshot,
    origin: ThreadId,
) -> Result<InstalledContext, PropagationFailure> {
    install_from(&mut snapshot, origin)
}

/// Installs `snapshot` in place.
///
/// On success `snapshot` is left empty; on failure it is untouched.
pub(crate) fn install_from(
    snapshot: &mut ContextSnapshot,
    origin: ThreadId,
) -> Result<InstalledContext, PropagationFailure> {
    let nested = INSTALL_DEPTH.with(Cell::get) > 0;
    let restore = nested || thread::current().id() == origin;
    let identifier = snapshot.identifier().to_string();

    try_exchange(snapshot, PropagationPhase::Install)?;
    let displaced = std::mem::take(snapshot);
    if !restore && !displaced.is_empty() {
        warn!(
            leaked_identifier = %displaced.identifier(),
            "Discarding context left behind on pooled thread"
        );
    }
    INSTALL_DEPTH.with(|depth| depth.set(depth.get() + 1));

    debug!(
        identifier = %identifier,
        thread = ?thread::current().name(),
        restore,
        "Installed transaction context"
    );
    Ok(InstalledContext {
        displaced: restore.then_some(displaced),
        identifier,
        finished: false,
        _thread_bound: PhantomData,
    })
}

impl InstalledContext {
    /// Returns the identifier that was installed.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns true if exit restores the displaced context instead of clearing.
    #[must_use]
    pub fn restores_displaced(&self) -> bool {
        self.displaced.is_some()
    }

    /// Resets the thread and returns the context as the task left it.
    ///
    /// # Errors
    ///
    /// Returns `PropagationFailure` if the thread-local store is unavailable.
    pub fn finish(mut self) -> Result<ContextSnapshot, PropagationFailure> {
        self.release()
    }

    fn release(&mut self) -> Result<ContextSnapshot, PropagationFailure> {
        self.finished = true;
        INSTALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));

        let next = self.displaced.take().unwrap_or_else(ContextSnapshot::empty);
        let left = try_replace(next, PropagationPhase::Clear)?;
        debug!(identifier = %self.identifier, "Cleared transaction context");
        Ok(left)
    }
}

impl Drop for InstalledContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(failure) = self.release() {
            let err = TxContextError::from(failure);
            let args = [serde_json::json!(self.identifier)];
            if !hooks::notify("propagation.clear", &args, &err) {
                error!(identifier = %self.identifier, error = %err, "Failed to clear context during unwind");
            }
        }
    }
}

/// A task bound to the context of the thread that submitted it.
///
/// This one wrapper covers every task shape: closures run through
/// [`Propagated::run`], futures through
/// [`PropagatedFuture`](super::PropagatedFuture).
#[derive(Debug, Clone)]
pub struct Propagated<T> {
    task: T,
    snapshot: ContextSnapshot,
    origin: ThreadId,
}

impl<T> Propagated<T> {
    /// Binds `task` to a copy of the current thread's context.
    ///
    /// If the store cannot be read, for instance while the thread is
    /// shutting down, the failure is reported and the empty context is
    /// captured instead.
    #[must_use]
    pub fn capture(task: T) -> Self {
        let snapshot = try_capture().unwrap_or_else(|failure| {
            let err = TxContextError::from(failure);
            if !hooks::notify("propagation.capture", &[], &err) {
                warn!(error = %err, "Capturing empty context");
            }
            ContextSnapshot::empty()
        });
        Self::with_snapshot(task, snapshot)
    }

    /// Binds `task` to an explicit snapshot.
    #[must_use]
    pub fn with_snapshot(task: T, snapshot: ContextSnapshot) -> Self {
        trace!(identifier = %snapshot.identifier(), "Captured transaction context");
        Self {
            task,
            snapshot,
            origin: thread::current().id(),
        }
    }

    /// Returns the captured snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }

    /// Returns the thread that captured the snapshot.
    #[must_use]
    pub fn origin(&self) -> ThreadId {
        self.origin
    }

    /// Unwraps the task, discarding the snapshot.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.task
    }

    pub(crate) fn into_parts(self) -> (T, ContextSnapshot, ThreadId) {
        (self.task, self.snapshot, self.origin)
    }
}

impl<F, R> Propagated<F>
where
    F: FnOnce() -> R,
{
    /// Installs the snapshot, runs the task and clears the thread.
    ///
    /// The thread is cleared even if the task panics; the panic then
    /// continues to unwind. If the snapshot cannot be installed and a failure
    /// handler is installed, the handler is notified and the task runs
    /// without a context.
    ///
    /// # Errors
    ///
    /// Returns `TxContextError::Propagation` when install or clear fails and
    /// no failure handler is installed. An install failure skips the task.
    pub fn run(self) -> Result<R, TxContextError> {
        let (task, snapshot, origin) = self.into_parts();
        let args = [serde_json::json!(snapshot.identifier())];

        let installed = match install(snapshot, origin) {
            Ok(installed) => Some(installed),
            Err(failure) => {
                let err = TxContextError::from(failure);
                if !hooks::notify("propagation.install", &args, &err) {
                    return Err(err);
                }
                None
            }
        };

        let output = task();

        if let Some(installed) = installed {
            if let Err(failure) = installed.finish() {
                let err = TxContextError::from(failure);
                if !hooks::notify("propagation.clear", &args, &err) {
                    return Err(err);
                }
            }
        }
        Ok(output)
    }
}

/// Wraps `task` so that it runs with the current thread's context.
///
/// The snapshot is taken now, not when the returned closure is called.
pub fn wrap<F, R>(task: F) -> impl FnOnce() -> Result<R, TxContextError>
where
    F: FnOnce() -> R,
{
    let task = Propagated::capture(task);
    move || task.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{self, with_store_locked, UNINITIALIZED_TRANSACTION_CONTEXT};
    use crate::hooks::CollectingFailureHandler;
    use crate::testing::exclusive_hooks;
    use std::sync::Arc;

    fn origin_elsewhere() -> ThreadId {
        std::thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn test_install_from_other_thread_clears_on_finish() {
        context::clear();
        let installed = install(ContextSnapshot::with_identifier("foo"), origin_elsewhere()).unwrap();
        assert!(!installed.restores_displaced());
        assert_eq!(context::get(), "foo");

        context::put_metadata("added", 1).unwrap();
        let left = installed.finish().unwrap();

        assert_eq!(left.identifier(), "foo");
        assert_eq!(left.get_metadata("added"), Some(&serde_json::json!(1)));
        assert!(context::capture().is_empty());
    }

    #[test]
    fn test_install_on_origin_thread_restores() {
        context::clear();
        context::set("caller");
        context::put_metadata("m", "caller-value").unwrap();

        let installed =
            install(ContextSnapshot::with_identifier("task"), thread::current().id()).unwrap();
        assert!(installed.restores_displaced());
        assert_eq!(context::get(), "task");
        assert_eq!(context::get_metadata("m").unwrap(), None);

        installed.finish().unwrap();
        assert_eq!(context::get(), "caller");
        assert_eq!(context::get_metadata("m").unwrap(), Some(serde_json::json!("caller-value")));
        context::clear();
    }

    #[test]
    fn test_nested_install_restores_outer() {
        context::clear();
        let outer = install(ContextSnapshot::with_identifier("outer"), origin_elsewhere()).unwrap();
        let inner = install(ContextSnapshot::with_identifier("inner"), origin_elsewhere()).unwrap();
        assert!(inner.restores_displaced());

        inner.finish().unwrap();
        assert_eq!(context::get(), "outer");

        outer.finish().unwrap();
        assert_eq!(context::get(), UNINITIALIZED_TRANSACTION_CONTEXT);
    }

    #[test]
    fn test_drop_clears_without_finish() {
        context::clear();
        {
            let _installed =
                install(ContextSnapshot::with_identifier("dropped"), origin_elsewhere()).unwrap();
            assert_eq!(context::get(), "dropped");
        }
        assert!(context::capture().is_empty());
    }

    #[test]
    fn test_install_warns_and_discards_leaked_context() {
        context::clear();
        context::set("leaked");
        let installed = install(ContextSnapshot::with_identifier("fresh"), origin_elsewhere()).unwrap();
        installed.finish().unwrap();
        assert_eq!(context::get(), UNINITIALIZED_TRANSACTION_CONTEXT);
    }

    #[test]
    fn test_run_on_capturing_thread_keeps_caller_context() {
        context::clear();
        context::set("caller");
        let task = Propagated::capture(|| {
            context::put_metadata("inside", true).unwrap();
            context::get()
        });
        context::set("changed-after-capture");

        assert_eq!(task.run().unwrap(), "caller");
        assert_eq!(context::get(), "changed-after-capture");
        assert_eq!(context::get_metadata("inside").unwrap(), None);
        context::clear();
    }

    #[test]
    fn test_run_on_other_thread() {
        context::clear();
        context::set("foo");
        context::put_metadata("m", "v").unwrap();
        let task = Propagated::capture(|| {
            (context::get(), context::get_metadata("m").unwrap())
        });
        context::clear();

        let (observed, after) = std::thread::spawn(move || {
            let observed = task.run().unwrap();
            (observed, context::capture())
        })
        .join()
        .unwrap();

        assert_eq!(observed.0, "foo");
        assert_eq!(observed.1, Some(serde_json::json!("v")));
        assert!(after.is_empty());
    }

    #[test]
    fn test_run_clears_after_panic() {
        context::clear();
        context::set("foo");
        let task = Propagated::capture(|| panic!("task failed"));

        let after = std::thread::spawn(move || {
            let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run()));
            assert!(caught.is_err());
            context::capture()
        })
        .join()
        .unwrap();

        assert!(after.is_empty());
        context::clear();
    }

    #[test]
    fn test_wrap_captures_at_wrap_time() {
        context::clear();
        context::set("at-wrap");
        let wrapped = wrap(context::get);
        context::set("at-call");

        let observed = std::thread::spawn(wrapped).join().unwrap().unwrap();
        assert_eq!(observed, "at-wrap");
        context::clear();
    }

    #[test]
    fn test_clone_captures_are_independent() {
        context::clear();
        context::set("shared");
        let first = Propagated::capture(|| {
            context::put_metadata("k", "first").unwrap();
            context::get_metadata("k").unwrap()
        });
        let second = first.clone();

        let a = std::thread::spawn(move || first.run().unwrap()).join().unwrap();
        let b = std::thread::spawn(move || {
            let before = context::get_metadata("k").unwrap();
            let _ = second.run();
            before
        })
        .join()
        .unwrap();

        assert_eq!(a, Some(serde_json::json!("first")));
        assert_eq!(b, None);
        context::clear();
    }

    #[test]
    fn test_install_failure_without_handler_skips_body() {
        let _hooks = exclusive_hooks();
        hooks::install(None);
        let ran = Cell::new(false);
        let task = Propagated::with_snapshot(|| ran.set(true), ContextSnapshot::with_identifier("x"));

        let err = with_store_locked(|| task.run()).unwrap_err();

        match err {
            TxContextError::Propagation(failure) => {
                assert_eq!(failure.phase, PropagationPhase::Install);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!ran.get());
        assert_eq!(INSTALL_DEPTH.with(Cell::get), 0);
    }

    #[test]
    fn test_install_failure_with_handler_runs_body() {
        let _hooks = exclusive_hooks();
        let collector = Arc::new(CollectingFailureHandler::new());
        hooks::install(Some(collector.clone()));
        let ran = Cell::new(false);
        let task = Propagated::with_snapshot(|| ran.set(true), ContextSnapshot::with_identifier("x"));

        let result = with_store_locked(|| task.run());

        hooks::install(None);
        assert!(result.is_ok());
        assert!(ran.get());
        let failures = collector.failures_for("propagation.install");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].args, vec![serde_json::json!("x")]);
        assert!(failures[0].propagation);
    }

    #[test]
    fn test_clear_failure_reported_by_finish() {
        context::clear();
        let installed = install(ContextSnapshot::with_identifier("x"), origin_elsewhere()).unwrap();

        let failure = with_store_locked(|| installed.finish()).unwrap_err();

        assert_eq!(failure.phase, PropagationPhase::Clear);
        assert_eq!(INSTALL_DEPTH.with(Cell::get), 0);
        context::clear();
    }

    #[test]
    fn test_clear_failure_on_drop_notifies_handler() {
        let _hooks = exclusive_hooks();
        let collector = Arc::new(CollectingFailureHandler::new());
        hooks::install(Some(collector.clone()));
        context::clear();
        let installed = install(ContextSnapshot::with_identifier("x"), origin_elsewhere()).unwrap();

        with_store_locked(|| drop(installed));

        hooks::install(None);
        let failures = collector.failures_for("propagation.clear");
        assert_eq!(failures.len(), 1);
        assert!(failures[0].propagation);
        context::clear();
    }

    #[test]
    fn test_failed_install_leaves_snapshot_in_place() {
        let mut snapshot = ContextSnapshot::with_identifier("kept");
        let origin = origin_elsewhere();

        let failure = with_store_locked(|| install_from(&mut snapshot, origin)).unwrap_err();

        assert_eq!(failure.phase, PropagationPhase::Install);
        assert_eq!(snapshot.identifier(), "kept");
    }
}
