//! Serialization helpers for batch payloads.
//!
//! Encoding borrows from the batch so flushing large buffers does not clone
//! every event. Decoding produces owned values and is used when inspecting
//! persisted batches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::log_event::FemtoLogEvent;

#[derive(Serialize)]
struct WireBatch<'a> {
    tags: &'a BTreeMap<String, String>,
    events: Vec<WireEvent<'a>>,
}

#[derive(Serialize)]
struct WireEvent<'a> {
    timestamp: i64,
    kvparse: bool,
    attributes: &'a BTreeMap<String, String>,
    rawstring: &'a str,
}

impl<'a> From<&'a FemtoLogEvent> for WireEvent<'a> {
    fn from(event: &'a FemtoLogEvent) -> Self {
        Self {
            timestamp: event.timestamp_ms(),
            kvparse: true,
            attributes: event.attributes(),
            rawstring: event.raw_text(),
        }
    }
}

/// Serialise `events` and `tags` into the one-element ingest payload.
///
/// # Errors
///
/// Returns the underlying [`serde_json::Error`] if encoding fails.
pub fn serialise_batch(
    tags: &BTreeMap<String, String>,
    events: &[FemtoLogEvent],
) -> serde_json::Result<Vec<u8>> {
    let batch = WireBatch {
        tags,
        events: events.iter().map(WireEvent::from).collect(),
    };
    serde_json::to_vec(&[batch])
}

/// A batch read back from its payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "OwnedWireBatch")]
pub struct DecodedBatch {
    pub tags: BTreeMap<String, String>,
    pub events: Vec<FemtoLogEvent>,
}

#[derive(Deserialize)]
struct OwnedWireBatch {
    #[serde(default)]
    tags: BTreeMap<String, String>,
    events: Vec<OwnedWireEvent>,
}

#[derive(Deserialize)]
struct OwnedWireEvent {
    timestamp: i64,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    rawstring: String,
}

impl From<OwnedWireBatch> for DecodedBatch {
    fn from(wire: OwnedWireBatch) -> Self {
        Self {
            tags: wire.tags,
            events: wire
                .events
                .into_iter()
                .map(|e| FemtoLogEvent::with_timestamp(e.timestamp, e.attributes, e.rawstring))
                .collect(),
        }
    }
}

/// Parse a payload produced by [`serialise_batch`].
///
/// # Errors
///
/// Returns an error if `bytes` is not a JSON array of batch objects.
pub fn decode_payload(bytes: &[u8]) -> serde_json::Result<Vec<DecodedBatch>> {
    serde_json::from_slice(bytes)
}
