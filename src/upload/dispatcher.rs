//! Upload bookkeeping for persisted batches.
//!
//! The dispatcher lives on the pipeline worker thread. It spawns one
//! short-lived thread per upload, so any number of batches can be in flight,
//! and it is the only component that deletes batch files. Upload threads
//! report back through a [`CompletionSink`]; the worker feeds those reports to
//! [`UploadDispatcher::handle_completion`], which keeps completion handling and
//! resumption on the same thread.

use std::{
    collections::HashMap,
    fmt, fs,
    io::ErrorKind,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, warn};

use super::transport::{ResponseClass, Transport, TransportError, classify_status};
use crate::{
    batch::BatchId,
    clock::{Clock, SystemClock},
    network::{NetworkMonitor, NetworkStatus},
    rate_limited_warner::RateLimitedWarner,
    store::{BatchFile, BatchStore},
};

/// Receives the result of every upload that was not cancelled.
pub type CompletionSink = Arc<dyn Fn(UploadCompletion) + Send + Sync>;

/// Result of one upload attempt, tagged with the task that produced it.
#[derive(Debug)]
pub struct UploadCompletion {
    pub id: BatchId,
    pub token: u64,
    pub outcome: Result<u16, TransportError>,
}

/// What the dispatcher did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    /// 2xx: the batch file was deleted.
    Delivered,
    /// 4xx: the batch file was deleted without retry.
    Rejected(u16),
    /// Transient failure: the file was left for the next resumption pass.
    Retained,
    /// Transient failure on a batch older than the retention limit; deleted.
    Expired,
    /// The completion did not match the tracked task for that batch.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Started,
    /// Uploads over metered networks are disallowed; the file stays on disk.
    Deferred,
    /// The file could not be read or the upload thread could not be spawned.
    Failed,
}

/// In-progress writes untouched for this long are treated as abandoned.
const ABANDONED_WRITE_AGE: Duration = Duration::from_secs(60);

/// Counts from one resumption pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeReport {
    pub cancelled: usize,
    pub resubmitted: usize,
    pub deferred: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Retention rules applied to persisted batches.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    /// Batches at least this old are deleted instead of retried.
    pub max_batch_age: Duration,
    pub allow_metered_network: bool,
}

struct PendingUpload {
    token: u64,
    cancelled: Arc<AtomicBool>,
}

impl PendingUpload {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Tracks in-flight uploads and applies the retention policy to their
/// outcomes.
pub struct UploadDispatcher {
    store: BatchStore,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    network: Arc<dyn NetworkMonitor>,
    policy: UploadPolicy,
    sink: CompletionSink,
    in_flight: HashMap<BatchId, PendingUpload>,
    next_token: u64,
    expired: RateLimitedWarner,
}

impl UploadDispatcher {
    pub fn new(
        store: BatchStore,
        transport: Arc<dyn Transport>,
        policy: UploadPolicy,
        sink: CompletionSink,
    ) -> Self {
        Self {
            store,
            transport,
            clock: Arc::new(SystemClock),
            network: Arc::new(NetworkStatus::default()),
            policy,
            sink,
            in_flight: HashMap::new(),
            next_token: 0,
            expired: RateLimitedWarner::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_network_monitor(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    /// Whether no upload is currently awaiting completion.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Read `file` and start uploading it on a background thread.
    ///
    /// A previous task for the same batch is cancelled first; its completion
    /// will be ignored. Upload threads only ever see the bytes read here.
    pub fn submit(&mut self, file: &BatchFile) -> Submission {
        if !self.policy.allow_metered_network && self.network.is_metered() {
            debug!(
                "UploadDispatcher: deferring batch {} while on a metered network",
                file.id
            );
            return Submission::Deferred;
        }
        let body = match fs::read(&file.path) {
            Ok(body) => body,
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    debug!("UploadDispatcher: batch {} vanished before upload", file.id);
                } else {
                    warn!("UploadDispatcher: cannot read batch {}: {err}", file.id);
                }
                return Submission::Failed;
            }
        };
        if let Some(previous) = self.in_flight.remove(&file.id) {
            previous.cancel();
        }

        let token = self.next_token;
        self.next_token += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = UploadTask {
            id: file.id,
            token,
            body,
            transport: Arc::clone(&self.transport),
            sink: Arc::clone(&self.sink),
            cancelled: Arc::clone(&cancelled),
        };
        let spawned = thread::Builder::new()
            .name(format!("femtobatch-upload-{}", file.id))
            .spawn(move || task.run());
        if let Err(err) = spawned {
            warn!(
                "UploadDispatcher: failed to start upload of batch {}: {err}",
                file.id
            );
            return Submission::Failed;
        }
        self.in_flight
            .insert(file.id, PendingUpload { token, cancelled });
        Submission::Started
    }

    /// Apply the retention policy to the outcome of an upload.
    ///
    /// Only the completion of the currently tracked task for a batch is acted
    /// upon, so duplicate or cancelled notifications never delete a file
    /// twice.
    pub fn handle_completion(&mut self, completion: UploadCompletion) -> CompletionAction {
        let UploadCompletion { id, token, outcome } = completion;
        match self.in_flight.get(&id) {
            Some(pending) if pending.token == token => {
                self.in_flight.remove(&id);
            }
            _ => {
                debug!("UploadDispatcher: ignoring stale completion for batch {id}");
                return CompletionAction::Ignored;
            }
        }

        match outcome {
            Ok(status) => match classify_status(status) {
                ResponseClass::Success => {
                    self.discard(id);
                    CompletionAction::Delivered
                }
                ResponseClass::Rejected => {
                    warn!("UploadDispatcher: batch {id} rejected with status {status}; dropping it");
                    self.discard(id);
                    CompletionAction::Rejected(status)
                }
                ResponseClass::Transient => {
                    debug!("UploadDispatcher: batch {id} got status {status}; keeping it");
                    self.retain_or_expire(id)
                }
            },
            Err(err) => {
                warn!("UploadDispatcher: upload of batch {id} failed: {err}");
                self.retain_or_expire(id)
            }
        }
    }

    /// Cancel every in-flight upload and resubmit all batches on disk.
    ///
    /// Batches that have reached the retention limit are deleted here rather
    /// than uploaded again, as are temporary files left by interrupted writes.
    pub fn resume(&mut self) -> ResumeReport {
        let mut report = ResumeReport::default();
        for (_, pending) in self.in_flight.drain() {
            pending.cancel();
            report.cancelled += 1;
        }

        let now = self.clock.now();
        if let Err(err) = self.store.sweep_pending(now, ABANDONED_WRITE_AGE) {
            warn!(
                "UploadDispatcher: cannot sweep abandoned writes in {}: {err}",
                self.store.dir().display()
            );
        }

        let files = match self.store.list() {
            Ok(files) => files,
            Err(err) => {
                warn!(
                    "UploadDispatcher: cannot list {}: {err}",
                    self.store.dir().display()
                );
                return report;
            }
        };

        for file in files {
            match self.store.age(file.id, now) {
                Ok(age) if age >= self.policy.max_batch_age => {
                    self.note_expired(file.id, age);
                    self.discard(file.id);
                    report.pruned += 1;
                    continue;
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => warn!("UploadDispatcher: cannot stat batch {}: {err}", file.id),
            }
            match self.submit(&file) {
                Submission::Started => report.resubmitted += 1,
                Submission::Deferred => report.deferred += 1,
                Submission::Failed => report.failed += 1,
            }
        }
        debug!("UploadDispatcher: resumption finished: {report:?}");
        report
    }

    /// Emit any pending expiry summary.
    pub fn flush_warnings(&self) {
        self.expired.flush(|count| {
            warn!("UploadDispatcher: discarded {count} batches past the retention limit");
        });
    }

    fn retain_or_expire(&mut self, id: BatchId) -> CompletionAction {
        match self.store.age(id, self.clock.now()) {
            Ok(age) if age >= self.policy.max_batch_age => {
                self.note_expired(id, age);
                self.discard(id);
                CompletionAction::Expired
            }
            Ok(_) => CompletionAction::Retained,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!("UploadDispatcher: cannot stat batch {id}: {err}");
                }
                CompletionAction::Retained
            }
        }
    }

    fn note_expired(&self, id: BatchId, age: Duration) {
        debug!("UploadDispatcher: batch {id} expired after {age:?}");
        self.expired.record_drop();
        self.expired.warn_if_due(|count| {
            warn!("UploadDispatcher: discarded {count} batches past the retention limit");
        });
    }

    fn discard(&self, id: BatchId) {
        if let Err(err) = self.store.remove(id) {
            warn!("UploadDispatcher: failed to delete batch {id}: {err}");
        }
    }
}

impl fmt::Debug for UploadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadDispatcher")
            .field("store", &self.store)
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

/// Work executed on an upload thread.
struct UploadTask {
    id: BatchId,
    token: u64,
    body: Vec<u8>,
    transport: Arc<dyn Transport>,
    sink: CompletionSink,
    cancelled: Arc<AtomicBool>,
}

impl UploadTask {
    fn run(self) {
        if self.is_cancelled() {
            return;
        }
        let outcome = self.transport.post(self.id, &self.body);
        if self.is_cancelled() {
            debug!("UploadDispatcher: dropping result of cancelled upload {}", self.id);
            return;
        }
        (self.sink)(UploadCompletion {
            id: self.id,
            token: self.token,
            outcome,
        });
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
