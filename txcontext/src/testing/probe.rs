//! Records the context that tasks observe while they run.

use crate::context::{self, ContextSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// One observation made by [`ContextProbe::record`].
#[derive(Debug, Clone)]
pub struct Observation {
    /// Caller-supplied label, usually a task index.
    pub label: String,
    /// The context installed when the observation was made.
    pub snapshot: ContextSnapshot,
    /// The thread the observation was made on.
    pub thread: ThreadId,
    /// The thread's name, if it has one.
    pub thread_name: Option<String>,
}

/// Shared recorder for the context seen inside tasks.
///
/// Clones share the same record, so a clone can be moved into each task.
#[derive(Debug, Clone, Default)]
pub struct ContextProbe {
    observations: Arc<Mutex<Vec<Observation>>>,
}

impl ContextProbe {
    /// Creates an empty probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current thread's context under `label`.
    pub fn record(&self, label: impl Into<String>) {
        let current = thread::current();
        self.observations.lock().push(Observation {
            label: label.into(),
            snapshot: context::capture(),
            thread: current.id(),
            thread_name: current.name().map(str::to_string),
        });
    }

    /// Returns all observations in recording order.
    #[must_use]
    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().clone()
    }

    /// Returns the observation recorded under `label`.
    #[must_use]
    pub fn find(&self, label: &str) -> Option<Observation> {
        self.observations
            .lock()
            .iter()
            .find(|o| o.label == label)
            .cloned()
    }

    /// Returns the identifiers observed, in recording order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.observations
            .lock()
            .iter()
            .map(|o| o.snapshot.identifier().to_string())
            .collect()
    }

    /// Returns the number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.lock().is_empty()
    }
}
