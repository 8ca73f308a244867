//! Directory of persisted, not-yet-acknowledged batches.
//!
//! The presence of `<uuid>.data` in the directory means the batch is pending
//! or in flight; its absence means it has been delivered, rejected, or
//! expired. Nothing else records batch state, so a listing taken after a
//! restart is enough to resume every interrupted upload.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::debug;

use crate::batch::BatchId;

/// Prefix of in-progress writes; [`BatchStore::list`] never reports these.
pub(crate) const PENDING_PREFIX: &str = ".pending-";
pub(crate) const PENDING_SUFFIX: &str = ".tmp";

/// A batch file found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchFile {
    pub id: BatchId,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct BatchStore {
    dir: PathBuf,
}

impl BatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed and return it.
    pub(crate) fn ensure_dir(&self) -> io::Result<&Path> {
        fs::create_dir_all(&self.dir)?;
        Ok(&self.dir)
    }

    pub fn path_for(&self, id: BatchId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// List every batch file, oldest first.
    ///
    /// A missing directory is treated as empty. Entries whose names do not
    /// follow the `<uuid>.data` convention are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn list(&self) -> io::Result<Vec<BatchFile>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(BatchId::from_file_name) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let file = BatchFile {
                id,
                path: entry.path(),
            };
            found.push((modified, file));
        }
        found.sort_by(|(a_time, a), (b_time, b)| a_time.cmp(b_time).then(a.id.cmp(&b.id)));
        Ok(found.into_iter().map(|(_, file)| file).collect())
    }

    /// Delete in-progress writes last modified at least `grace` before `now`.
    ///
    /// A write that was interrupted by a crash leaves its temporary file
    /// behind; nothing else would ever remove it. Returns the number of files
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn sweep_pending(&self, now: SystemTime, grace: Duration) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !(name.starts_with(PENDING_PREFIX) && name.ends_with(PENDING_SUFFIX)) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if now.duration_since(modified).unwrap_or(Duration::ZERO) < grace {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!("BatchStore: removed abandoned write {name}");
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    /// Read the payload of batch `id`.
    pub fn read(&self, id: BatchId) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(id))
    }

    /// Delete batch `id`.
    ///
    /// Returns `Ok(true)` if a file was removed and `Ok(false)` if it was
    /// already gone.
    ///
    /// # Errors
    ///
    /// Returns any failure other than the file being absent.
    pub fn remove(&self, id: BatchId) -> io::Result<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => {
                debug!("BatchStore: removed batch {id}");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Time elapsed between the batch being written and `now`.
    ///
    /// Batch files are never modified after they are persisted, so the
    /// modification time doubles as the creation time. A timestamp in the
    /// future yields zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or its metadata is unreadable.
    pub fn age(&self, id: BatchId, now: SystemTime) -> io::Result<Duration> {
        let written = fs::metadata(self.path_for(id))?.modified()?;
        Ok(now.duration_since(written).unwrap_or(Duration::ZERO))
    }
}
