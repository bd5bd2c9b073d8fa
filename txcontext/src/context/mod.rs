//! Per-thread transaction context.
//!
//! This module provides:
//! - The thread-confined context store and its metadata operations
//! - A tag index grouping metadata keys
//! - The reserved-namespace guard
//! - Immutable snapshots used to move a context between threads

pub mod guard;
mod snapshot;
mod store;
mod tags;

pub use guard::{is_reserved, RESERVED_PREFIX};
pub use snapshot::ContextSnapshot;
pub use store::{
    capture, clear, clear_metadata_tag, create, get, get_metadata, get_metadata_with_tag,
    has_metadata_tag, is_within_created_context, put_metadata, remove_metadata, replace, set,
    set_metadata_tag, uninitialized_transaction_context_value, UNINITIALIZED_TRANSACTION_CONTEXT,
};
pub use tags::TagIndex;

#[cfg(test)]
pub(crate) use store::with_store_locked;
pub(crate) use store::{try_capture, try_exchange, try_replace};
