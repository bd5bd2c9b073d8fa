//! Tag index grouping metadata keys.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Maps a tag name to the set of metadata keys carrying it.
///
/// A key may carry any number of tags. Tags whose last key is removed are
/// pruned, so [`TagIndex::tags`] never reports an empty tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagIndex {
    tags: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    /// Creates an empty tag index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `key` with `tag`.
    ///
    /// Returns true if the association is new.
    pub fn tag(&mut self, key: impl Into<String>, tag: impl Into<String>) -> bool {
        self.tags.entry(tag.into()).or_default().insert(key.into())
    }

    /// Removes the association between `key` and `tag`.
    ///
    /// Returns true if the association existed.
    pub fn untag(&mut self, key: &str, tag: &str) -> bool {
        let Some(keys) = self.tags.get_mut(tag) else {
            return false;
        };
        let removed = keys.remove(key);
        if keys.is_empty() {
            self.tags.remove(tag);
        }
        removed
    }

    /// Drops `key` from every tag, pruning tags left empty.
    pub fn remove_key(&mut self, key: &str) {
        self.tags.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Keeps only the keys for which `keep` returns true, pruning tags
    /// left empty.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.tags.retain(|_, keys| {
            keys.retain(|key| keep(key.as_str()));
            !keys.is_empty()
        });
    }

    /// Returns true if `key` carries `tag`.
    #[must_use]
    pub fn has_tag(&self, key: &str, tag: &str) -> bool {
        self.tags.get(tag).is_some_and(|keys| keys.contains(key))
    }

    /// Returns the keys carrying `tag`.
    pub fn keys_with(&self, tag: &str) -> impl Iterator<Item = &str> {
        self.tags
            .get(tag)
            .into_iter()
            .flat_map(|keys| keys.iter().map(String::as_str))
    }

    /// Returns all tags that currently have at least one key.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// Returns the tags carried by `key`.
    #[must_use]
    pub fn tags_of(&self, key: &str) -> Vec<String> {
        self.tags
            .iter()
            .filter(|(_, keys)| keys.contains(key))
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Returns the number of non-empty tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns true if no tag is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Removes every tag.
    pub fn clear(&mut self) {
        self.tags.clear();
    }
}
