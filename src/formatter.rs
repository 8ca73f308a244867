//! Rendering of a level and message into an event's raw text.

use crate::level::FemtoLevel;

/// Trait for turning a level and message into the raw text of an event.
///
/// Implementors must be thread-safe (`Send + Sync`) so a formatter can be
/// shared between every thread that logs through the same pipeline.
pub trait EventFormatter: Send + Sync {
    /// Format a message into the line stored in the event's `rawstring`.
    fn format(&self, level: FemtoLevel, message: &str) -> String;
}

/// Produces `level=INFO message` lines so the ingest side can parse the
/// leading key-value pairs.
#[derive(Copy, Clone, Debug, Default)]
pub struct KeyValueFormatter;

impl EventFormatter for KeyValueFormatter {
    fn format(&self, level: FemtoLevel, message: &str) -> String {
        format!("level={level} {message}")
    }
}

impl<F> EventFormatter for F
where
    F: Fn(FemtoLevel, &str) -> String + Send + Sync,
{
    fn format(&self, level: FemtoLevel, message: &str) -> String {
        self(level, message)
    }
}
