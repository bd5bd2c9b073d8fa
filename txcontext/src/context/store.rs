//! Per-thread transaction context store.
//!
//! Every function here works on the calling thread's own context. There is no
//! way to reach another thread's store; contexts move between threads only as
//! [`ContextSnapshot`] values handed over by the propagation adapters.

use super::guard::check_key;
use super::{ContextSnapshot, TagIndex};
use crate::errors::{PropagationFailure, PropagationPhase, ReservedKeyViolation};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::trace;
use uuid::Uuid;

/// Identifier reported by threads that are not inside a transaction.
pub const UNINITIALIZED_TRANSACTION_CONTEXT: &str = "txcontext_null_id";

#[derive(Debug)]
struct ThreadContext {
    identifier: String,
    metadata: HashMap<String, serde_json::Value>,
    tags: TagIndex,
}

impl ThreadContext {
    fn new() -> Self {
        Self {
            identifier: UNINITIALIZED_TRANSACTION_CONTEXT.to_string(),
            metadata: HashMap::new(),
            tags: TagIndex::new(),
        }
    }

    fn reset(&mut self) {
        UNINITIALIZED_TRANSACTION_CONTEXT.clone_into(&mut self.identifier);
        self.metadata.clear();
        self.tags.clear();
    }

    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot::from_parts(
            self.identifier.clone(),
            self.metadata.clone(),
            self.tags.clone(),
        )
    }

    fn exchange(&mut self, snapshot: &mut ContextSnapshot) {
        let (identifier, metadata, tags) = snapshot.parts_mut();
        std::mem::swap(&mut self.identifier, identifier);
        std::mem::swap(&mut self.metadata, metadata);
        std::mem::swap(&mut self.tags, tags);
    }
}

thread_local! {
    static CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::new());
}

fn with_context<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> R {
    CONTEXT.with(|cell| f(&mut cell.borrow_mut()))
}

/// Starts a new transaction on this thread and returns its identifier.
///
/// Existing metadata is kept: creating a transaction does not clear.
pub fn create() -> String {
    let identifier = Uuid::new_v4().to_string();
    trace!(identifier = %identifier, "Created transaction context");
    with_context(|ctx| ctx.identifier.clone_from(&identifier));
    identifier
}

/// Installs `identifier` as this thread's transaction identifier.
///
/// Setting the sentinel is allowed; it leaves metadata untouched.
pub fn set(identifier: impl Into<String>) {
    let identifier = identifier.into();
    with_context(|ctx| ctx.identifier = identifier);
}

/// Returns this thread's transaction identifier, or the sentinel.
#[must_use]
pub fn get() -> String {
    with_context(|ctx| ctx.identifier.clone())
}

/// Resets this thread to the sentinel identifier with no metadata or tags.
pub fn clear() {
    with_context(ThreadContext::reset);
}

/// Returns true if this thread is inside a created transaction.
#[must_use]
pub fn is_within_created_context() -> bool {
    with_context(|ctx| ctx.identifier != UNINITIALIZED_TRANSACTION_CONTEXT)
}

/// Returns the sentinel identifier, so callers never hardcode it.
#[must_use]
pub fn uninitialized_transaction_context_value() -> &'static str {
    UNINITIALIZED_TRANSACTION_CONTEXT
}

/// Stores `value` under `key`, replacing any previous value.
///
/// # Errors
///
/// Returns `ReservedKeyViolation` if `key` is reserved; nothing is stored.
pub fn put_metadata(
    key: impl Into<String>,
    value: impl Into<serde_json::Value>,
) -> Result<(), ReservedKeyViolation> {
    let key = key.into();
    check_key(&key, "put_metadata")?;
    let value = value.into();
    with_context(|ctx| {
        ctx.metadata.insert(key, value);
    });
    Ok(())
}

/// Returns the value stored under `key`.
///
/// # Errors
///
/// Returns `ReservedKeyViolation` if `key` is reserved. Reads are guarded
/// like writes so the reserved namespace stays opaque.
pub fn get_metadata(key: &str) -> Result<Option<serde_json::Value>, ReservedKeyViolation> {
    check_key(key, "get_metadata")?;
    Ok(with_context(|ctx| ctx.metadata.get(key).cloned()))
}

/// Removes the entry under `key` along with all of its tag associations.
///
/// # Errors
///
/// Returns `ReservedKeyViolation` if `key` is reserved.
pub fn remove_metadata(key: &str) -> Result<Option<serde_json::Value>, ReservedKeyViolation> {
    check_key(key, "remove_metadata")?;
    Ok(with_context(|ctx| {
        let removed = ctx.metadata.remove(key);
        if removed.is_some() {
            ctx.tags.remove_key(key);
        }
        removed
    }))
}

/// Tags the metadata entry `key` with `tag`.
///
/// Returns `Ok(false)` without recording anything when `key` has no entry.
///
/// # Errors
///
/// Returns `ReservedKeyViolation` if `key` is reserved.
pub fn set_metadata_tag(key: &str, tag: impl Into<String>) -> Result<bool, ReservedKeyViolation> {
    check_key(key, "set_metadata_tag")?;
    let tag = tag.into();
    Ok(with_context(|ctx| {
        if !ctx.metadata.contains_key(key) {
            trace!(key = %key, tag = %tag, "Ignoring tag for absent metadata key");
            return false;
        }
        ctx.tags.tag(key, tag);
        true
    }))
}

/// Removes `tag` from the metadata entry `key`.
///
/// Returns true if the tag was present.
///
/// # Errors
///
/// Returns `ReservedKeyViolation` if `key` is reserved.
pub fn clear_metadata_tag(key: &str, tag: &str) -> Result<bool, ReservedKeyViolation> {
    check_key(key, "clear_metadata_tag")?;
    Ok(with_context(|ctx| ctx.tags.untag(key, tag)))
}

/// Returns true if the metadata entry `key` carries `tag`.
///
/// # Errors
///
/// Returns `ReservedKeyViolation` if `key` is reserved.
pub fn has_metadata_tag(key: &str, tag: &str) -> Result<bool, ReservedKeyViolation> {
    check_key(key, "has_metadata_tag")?;
    Ok(with_context(|ctx| ctx.tags.has_tag(key, tag)))
}

/// Returns a copy of every metadata entry tagged with `tag`.
///
/// Unknown tags yield an empty map.
#[must_use]
pub fn get_metadata_with_tag(tag: &str) -> HashMap<String, serde_json::Value> {
    with_context(|ctx| {
        ctx.tags
            .keys_with(tag)
            .filter_map(|key| {
                ctx.metadata
                    .get(key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect()
    })
}

/// Copies this thread's context into a snapshot.
#[must_use]
pub fn capture() -> ContextSnapshot {
    with_context(|ctx| ctx.snapshot())
}

/// Installs `snapshot` on this thread and returns the displaced context.
///
/// Every [`ContextSnapshot`] is free of reserved keys and stale tag
/// references, so the installed state holds the store's invariants.
pub fn replace(mut snapshot: ContextSnapshot) -> ContextSnapshot {
    with_context(|ctx| ctx.exchange(&mut snapshot));
    snapshot
}

/// Fallible variant of [`capture`] for the adapter layer.
pub(crate) fn try_capture() -> Result<ContextSnapshot, PropagationFailure> {
    CONTEXT
        .try_with(|cell| {
            cell.try_borrow()
                .map(|ctx| ctx.snapshot())
                .map_err(|e| PropagationFailure::new(PropagationPhase::Capture, e.to_string()))
        })
        .map_err(|e| PropagationFailure::new(PropagationPhase::Capture, e.to_string()))?
}

/// Fallible variant of [`replace`] for the adapter layer.
///
/// Never panics, even while the thread-local store is being torn down.
pub(crate) fn try_replace(
    mut snapshot: ContextSnapshot,
    phase: PropagationPhase,
) -> Result<ContextSnapshot, PropagationFailure> {
    try_exchange(&mut snapshot, phase)?;
    Ok(snapshot)
}

/// Swaps `snapshot` with this thread's context.
///
/// On success `snapshot` holds the displaced context. On failure it is left
/// untouched, so the caller keeps the context it tried to install.
pub(crate) fn try_exchange(
    snapshot: &mut ContextSnapshot,
    phase: PropagationPhase,
) -> Result<(), PropagationFailure> {
    CONTEXT
        .try_with(|cell| {
            cell.try_borrow_mut()
                .map(|mut ctx| ctx.exchange(snapshot))
                .map_err(|e| PropagationFailure::new(phase, e.to_string()))
        })
        .map_err(|e| PropagationFailure::new(phase, e.to_string()))?
}

/// Runs `f` while this thread's store is borrowed, so every adapter
/// operation on the store fails.
#[cfg(test)]
pub(crate) fn with_store_locked<R>(f: impl FnOnce() -> R) -> R {
    CONTEXT.with(|cell| {
        let _held = cell.borrow();
        f()
    })
}
