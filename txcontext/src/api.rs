//! Application-facing context operations.
//!
//! Mirrors [`crate::context`] with every fallible call routed through the
//! failure hook. With a handler installed, a reserved key violation is
//! reported to it and the call returns a neutral value (nothing stored,
//! nothing found) instead of an error. With no handler the error is
//! returned as usual.

use crate::context;
use crate::errors::TxContextError;
use crate::hooks::route;
use serde_json::{json, Value};
use std::collections::HashMap;

pub use crate::context::{
    clear, create, get, get_metadata_with_tag, is_within_created_context, set,
    uninitialized_transaction_context_value,
};

/// Stores `value` under `key`.
///
/// # Errors
///
/// Returns the reserved key violation when `key` is reserved and no
/// failure handler is installed.
pub fn put_metadata(key: &str, value: impl Into<Value>) -> Result<(), TxContextError> {
    let value = value.into();
    let args = [json!(key), value.clone()];
    route("put_metadata", &args, context::put_metadata(key, value), || ())
}

/// Returns the value stored under `key`.
///
/// # Errors
///
/// Returns the reserved key violation when `key` is reserved and no
/// failure handler is installed.
pub fn get_metadata(key: &str) -> Result<Option<Value>, TxContextError> {
    route("get_metadata", &[json!(key)], context::get_metadata(key), || None)
}

/// Removes `key` and its tag associations.
///
/// # Errors
///
/// Returns the reserved key violation when `key` is reserved and no
/// failure handler is installed.
pub fn remove_metadata(key: &str) -> Result<Option<Value>, TxContextError> {
    route("remove_metadata", &[json!(key)], context::remove_metadata(key), || None)
}

/// Associates `key` with `tag`.
///
/// # Errors
///
/// Returns the reserved key violation when `key` is reserved and no
/// failure handler is installed.
pub fn set_metadata_tag(key: &str, tag: &str) -> Result<bool, TxContextError> {
    let args = [json!(key), json!(tag)];
    route("set_metadata_tag", &args, context::set_metadata_tag(key, tag), || false)
}

/// Removes the association between `key` and `tag`.
///
/// # Errors
///
/// Returns the reserved key violation when `key` is reserved and no
/// failure handler is installed.
pub fn clear_metadata_tag(key: &str, tag: &str) -> Result<bool, TxContextError> {
    let args = [json!(key), json!(tag)];
    route("clear_metadata_tag", &args, context::clear_metadata_tag(key, tag), || false)
}

/// Returns true if `key` carries `tag`.
///
/// # Errors
///
/// Returns the reserved key violation when `key` is reserved and no
/// failure handler is installed.
pub fn has_metadata_tag(key: &str, tag: &str) -> Result<bool, TxContextError> {
    let args = [json!(key), json!(tag)];
    route("has_metadata_tag", &args, context::has_metadata_tag(key, tag), || false)
}

/// Returns every tagged entry, grouped by tag.
pub fn metadata_by_tag() -> HashMap<String, HashMap<String, Value>> {
    let snapshot = context::capture();
    snapshot
        .tags()
        .tags()
        .into_iter()
        .map(|tag| {
            let entries = snapshot.metadata_with_tag(&tag);
            (tag, entries)
        })
        .collect()
}
