//! Context propagation for futures.

use super::adapter::{install_from, Propagated};
use crate::context::ContextSnapshot;
use crate::errors::TxContextError;
use crate::hooks;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::ThreadId;
use tracing::error;

/// A future that runs every poll inside its captured transaction context.
///
/// The context is installed before each poll and removed after it, so a
/// runtime worker never carries the context between polls of different
/// tasks. Mutations made during one poll are carried into the next.
pub struct PropagatedFuture<F> {
    future: Pin<Box<F>>,
    snapshot: ContextSnapshot,
    origin: ThreadId,
}

impl<F: Future> PropagatedFuture<F> {
    /// Binds `future` to a copy of the current thread's context.
    #[must_use]
    pub fn capture(future: F) -> Self {
        Propagated::capture(future).into()
    }

    /// Binds `future` to an explicit snapshot.
    #[must_use]
    pub fn with_snapshot(future: F, snapshot: ContextSnapshot) -> Self {
        Propagated::with_snapshot(future, snapshot).into()
    }

    /// Returns the context the next poll will run with.
    #[must_use]
    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }
}

impl<F: Future> From<Propagated<F>> for PropagatedFuture<F> {
    fn from(propagated: Propagated<F>) -> Self {
        let (future, snapshot, origin) = propagated.into_parts();
        Self {
            future: Box::pin(future),
            snapshot,
            origin,
        }
    }
}

fn report(call: &str, identifier: &str, err: &TxContextError) {
    let args = [serde_json::json!(identifier)];
    if !hooks::notify(call, &args, err) {
        error!(identifier = %identifier, error = %err, "Context propagation failed while polling");
    }
}

impl<F: Future> Future for PropagatedFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let identifier = this.snapshot.identifier().to_string();

        let installed = match install_from(&mut this.snapshot, this.origin) {
            Ok(installed) => Some(installed),
            Err(failure) => {
                report("propagation.install", &identifier, &failure.into());
                None
            }
        };

        let poll = this.future.as_mut().poll(cx);

        if let Some(installed) = installed {
            match installed.finish() {
                Ok(left) => this.snapshot = left,
                Err(failure) => report("propagation.clear", &identifier, &failure.into()),
            }
        }
        poll
    }
}

impl<F> std::fmt::Debug for PropagatedFuture<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagatedFuture")
            .field("identifier", &self.snapshot.identifier())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Extension trait binding futures to the current transaction context.
pub trait WithTransactionContext: Future + Sized {
    /// Binds this future to a copy of the current thread's context.
    fn with_transaction_context(self) -> PropagatedFuture<Self> {
        PropagatedFuture::capture(self)
    }
}

impl<F: Future> WithTransactionContext for F {}
