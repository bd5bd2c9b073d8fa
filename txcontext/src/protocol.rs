//! Protocol events carrying request or response headers.
//!
//! Headers travel between a protocol event and the current transaction
//! context as metadata tagged [`HEADER_TAG`].

use crate::context::{self, guard};
use crate::errors::ReservedKeyViolation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered header name to header value map.
pub type HeaderMap = BTreeMap<String, String>;

/// Tag applied to metadata entries that came from protocol headers.
pub const HEADER_TAG: &str = "protocol_header";

/// A request or response event observed at a protocol boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    origin: String,
    #[serde(default)]
    headers: HeaderMap,
}

impl ProtocolEvent {
    /// Creates an event with no headers.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Merges `headers` into the event, overwriting existing names.
    #[must_use]
    pub fn with_header_map(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets a single header.
    #[must_use]
    pub fn with_header_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Returns the value of header `key`.
    pub fn header_data(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns all headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the component that produced the event.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Copies every header into the current context as tagged metadata.
    ///
    /// Returns the number of headers written.
    ///
    /// # Errors
    ///
    /// Returns `ReservedKeyViolation` if any header name is reserved. Names
    /// are checked before anything is written, so the context is unchanged.
    pub fn propagate_to_context(&self) -> Result<usize, ReservedKeyViolation> {
        for name in self.headers.keys() {
            guard::check_key(name, "propagate_to_context")?;
        }
        for (name, value) in &self.headers {
            context::put_metadata(name.clone(), value.clone())?;
            context::set_metadata_tag(name, HEADER_TAG)?;
        }
        Ok(self.headers.len())
    }

    /// Merges header-tagged string metadata from the current context.
    ///
    /// Non-string values are skipped.
    #[must_use]
    pub fn absorb_from_context(mut self) -> Self {
        for (name, value) in context::get_metadata_with_tag(HEADER_TAG) {
            if let serde_json::Value::String(value) = value {
                self.headers.insert(name, value);
            }
        }
        self
    }
}
