//! Immutable context snapshots.

use super::guard::check_key;
use super::store::UNINITIALIZED_TRANSACTION_CONTEXT;
use super::TagIndex;
use crate::errors::ReservedKeyViolation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A by-value copy of a thread's transaction context.
///
/// Snapshots are taken on the submitting thread and installed on whichever
/// thread runs the task. Later mutation of the submitting thread's store
/// cannot reach a snapshot that is already in flight.
///
/// A snapshot holds the same invariants as a live store: no reserved
/// metadata keys, and every tagged key present in the metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotRepr")]
pub struct ContextSnapshot {
    /// The transaction identifier (the sentinel when no context exists).
    identifier: String,

    /// Metadata entries.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, serde_json::Value>,

    /// Tag index over `metadata`.
    #[serde(default, skip_serializing_if = "TagIndex::is_empty")]
    tags: TagIndex,
}

/// Unvalidated wire form of a snapshot.
#[derive(Deserialize)]
struct SnapshotRepr {
    identifier: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    tags: TagIndex,
}

impl TryFrom<SnapshotRepr> for ContextSnapshot {
    type Error = ReservedKeyViolation;

    /// Rejects reserved keys and drops tag entries for absent keys.
    fn try_from(repr: SnapshotRepr) -> Result<Self, Self::Error> {
        for key in repr.metadata.keys() {
            check_key(key, "deserialize_snapshot")?;
        }
        let mut tags = repr.tags;
        tags.retain_keys(|key| repr.metadata.contains_key(key));
        Ok(Self {
            identifier: repr.identifier,
            metadata: repr.metadata,
            tags,
        })
    }
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl ContextSnapshot {
    /// Creates the snapshot of a thread with no transaction.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            identifier: UNINITIALIZED_TRANSACTION_CONTEXT.to_string(),
            metadata: HashMap::new(),
            tags: TagIndex::new(),
        }
    }

    /// Creates a snapshot carrying `identifier` and no metadata.
    #[must_use]
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::empty()
        }
    }

    /// Adds a metadata entry.
    ///
    /// # Errors
    ///
    /// Returns `ReservedKeyViolation` if `key` is reserved.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<Self, ReservedKeyViolation> {
        let key = key.into();
        check_key(&key, "with_metadata")?;
        self.metadata.insert(key, value);
        Ok(self)
    }

    /// Tags an existing metadata entry. Unknown keys are ignored.
    #[must_use]
    pub fn with_tag(mut self, key: &str, tag: impl Into<String>) -> Self {
        if self.metadata.contains_key(key) {
            self.tags.tag(key, tag);
        }
        self
    }

    pub(crate) fn from_parts(
        identifier: String,
        metadata: HashMap<String, serde_json::Value>,
        tags: TagIndex,
    ) -> Self {
        Self {
            identifier,
            metadata,
            tags,
        }
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (&mut String, &mut HashMap<String, serde_json::Value>, &mut TagIndex) {
        (&mut self.identifier, &mut self.metadata, &mut self.tags)
    }

    /// Returns the transaction identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns true if the snapshot carries a real transaction.
    #[must_use]
    pub fn is_within_created_context(&self) -> bool {
        self.identifier != UNINITIALIZED_TRANSACTION_CONTEXT
    }

    /// Returns true if the snapshot has no transaction, metadata or tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.is_within_created_context() && self.metadata.is_empty() && self.tags.is_empty()
    }

    /// Returns the metadata entries.
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Returns a single metadata value.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Returns the tag index.
    #[must_use]
    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    /// Returns a copy of the entries tagged with `tag`.
    #[must_use]
    pub fn metadata_with_tag(&self, tag: &str) -> HashMap<String, serde_json::Value> {
        self.tags
            .keys_with(tag)
            .filter_map(|key| {
                self.metadata
                    .get(key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect()
    }
}
