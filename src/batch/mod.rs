//! Batches: the durable unit of upload and retry.
//!
//! A [`Batch`] groups the events drained from the buffer by one flush with the
//! logger's fixed tags. The [`BatchWriter`] serialises it into the ingest
//! payload and persists it as `<uuid>.data`; from then on the file, not any
//! in-memory state, decides whether the batch still needs delivering.
//!
//! # Payload
//!
//! ```text
//! [ { "tags": {..},
//!     "events": [ {"timestamp": ms, "kvparse": true,
//!                  "attributes": {..}, "rawstring": ".."}, .. ] } ]
//! ```

mod serialise;
mod writer;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

use crate::log_event::FemtoLogEvent;

pub use serialise::{DecodedBatch, decode_payload, serialise_batch};
pub use writer::BatchWriter;

/// Extension carried by every persisted batch file.
pub const BATCH_FILE_EXTENSION: &str = "data";

/// Unique identifier of a batch, embedded in its file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// File name under which the batch is persisted.
    pub fn file_name(&self) -> String {
        format!("{}.{BATCH_FILE_EXTENSION}", self.0)
    }

    /// Recover the identifier from a batch file name, if it is one.
    ///
    /// Only the lowercase hyphenated form written by [`BatchId::file_name`] is
    /// accepted, so every recovered id maps back to the same path.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(BATCH_FILE_EXTENSION)?.strip_suffix('.')?;
        let id: Self = stem.parse().ok()?;
        (id.file_name() == name).then_some(id)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Events from one flush plus the logger's tags.
#[derive(Clone, Debug)]
pub struct Batch {
    id: BatchId,
    tags: BTreeMap<String, String>,
    events: Vec<FemtoLogEvent>,
}

impl Batch {
    pub fn new(tags: BTreeMap<String, String>, events: Vec<FemtoLogEvent>) -> Self {
        Self {
            id: BatchId::generate(),
            tags,
            events,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn events(&self) -> &[FemtoLogEvent] {
        &self.events
    }
}

/// Reasons a batch could not be written. Either way the events are lost.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to serialise batch: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("failed to persist batch: {0}")]
    Persistence(#[source] io::Error),
    #[error("refusing to write a batch with no events")]
    Empty,
}
