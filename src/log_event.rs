//! Log event representation buffered by the batch pipeline.
//!
//! A [`FemtoLogEvent`] is an already-formatted log line together with the
//! millisecond timestamp at which it was recorded and the string attributes
//! attached by the logger. Events are immutable once created; helpers that
//! adjust them consume the event and return a new one.

use std::collections::BTreeMap;
use std::fmt;

/// A single formatted log line awaiting upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FemtoLogEvent {
    timestamp_ms: i64,
    attributes: BTreeMap<String, String>,
    raw_text: String,
}

impl FemtoLogEvent {
    /// Create an event stamped with the current wall-clock time.
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self::with_timestamp(
            chrono::Utc::now().timestamp_millis(),
            BTreeMap::new(),
            raw_text,
        )
    }

    /// Create an event with an explicit timestamp and attributes.
    pub fn with_timestamp(
        timestamp_ms: i64,
        attributes: BTreeMap<String, String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            attributes,
            raw_text: raw_text.into(),
        }
    }

    /// Return the event with `key` set to `value`.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Fill in logger-level attributes the event does not already carry.
    pub(crate) fn with_default_attributes(mut self, defaults: &BTreeMap<String, String>) -> Self {
        for (key, value) in defaults {
            self.attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Remove every backslash from the raw text.
    pub(crate) fn without_backslashes(mut self) -> Self {
        if self.raw_text.contains('\\') {
            self.raw_text.retain(|c| c != '\\');
        }
        self
    }
}

impl fmt::Display for FemtoLogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp_ms, self.raw_text)
    }
}
