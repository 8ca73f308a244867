//! Persists batches as immutable files in the storage directory.

use std::io::Write;

use log::debug;
use tempfile::Builder as TempFileBuilder;

use super::{Batch, BatchError, serialise::serialise_batch};
use crate::store::{BatchFile, BatchStore, PENDING_PREFIX, PENDING_SUFFIX};

/// Writes serialised batches into a [`BatchStore`] directory.
#[derive(Clone, Debug)]
pub struct BatchWriter {
    store: BatchStore,
}

impl BatchWriter {
    pub fn new(store: BatchStore) -> Self {
        Self { store }
    }

    /// Serialise `batch` and persist it as `<id>.data`.
    ///
    /// The payload goes to a temporary file in the same directory first and is
    /// then renamed into place, so a crash never leaves a truncated batch file
    /// behind. The directory is created if it does not exist.
    ///
    /// # Errors
    ///
    /// * [`BatchError::Empty`] - `batch` has no events.
    /// * [`BatchError::Serialization`] - the payload could not be encoded.
    /// * [`BatchError::Persistence`] - the file could not be written.
    pub fn write(&self, batch: &Batch) -> Result<BatchFile, BatchError> {
        if batch.events().is_empty() {
            return Err(BatchError::Empty);
        }
        let payload =
            serialise_batch(batch.tags(), batch.events()).map_err(BatchError::Serialization)?;
        let file = self.persist(batch, &payload).map_err(BatchError::Persistence)?;
        debug!(
            "BatchWriter: wrote batch {} ({} events, {} bytes)",
            file.id,
            batch.events().len(),
            payload.len()
        );
        Ok(file)
    }

    fn persist(&self, batch: &Batch, payload: &[u8]) -> std::io::Result<BatchFile> {
        let dir = self.store.ensure_dir()?;
        let mut tmp = TempFileBuilder::new()
            .prefix(PENDING_PREFIX)
            .suffix(PENDING_SUFFIX)
            .tempfile_in(dir)?;
        tmp.write_all(payload)?;
        tmp.as_file().sync_all()?;
        let path = self.store.path_for(batch.id());
        tmp.persist_noclobber(&path).map_err(|err| err.error)?;
        Ok(BatchFile {
            id: batch.id(),
            path,
        })
    }
}
