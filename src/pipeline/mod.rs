//! The batching pipeline handle.
//!
//! [`FemtoBatchLogger`] owns the worker thread that buffers events, writes
//! them to batch files and uploads those files. The handle itself is cheap to
//! share behind an `Arc`; every method forwards a command over an unbounded
//! channel so producers never wait on disk or network I/O.

mod hooks;
mod worker;


use std::{sync::Arc, thread, time::Duration};

use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;

pub use hooks::{CompletionCallback, HostHooks, Recorder, Terminable, UploadCompletionHandler};

use crate::{
    clock::Clock,
    config::{BatchLoggerBuilder, ConfigError, LoggerConfig},
    formatter::EventFormatter,
    level::FemtoLevel,
    log_event::FemtoLogEvent,
    network::NetworkMonitor,
    rate_limited_warner::RateLimitedWarner,
    store::{BatchFile, BatchStore},
    upload::{ResumeReport, Transport},
};

use worker::{PipelineCommand, spawn_worker};

/// External collaborators injected into a pipeline.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) network: Arc<dyn NetworkMonitor>,
    pub(crate) formatter: Arc<dyn EventFormatter>,
}

/// Durable, batched uploader for formatted log lines.
///
/// Events are buffered in memory and written to a `<uuid>.data` batch file
/// every flush interval, on [`flush_now`](Recorder::flush_now), and on
/// termination. Each batch is uploaded in the background; the file is deleted
/// once the endpoint accepts or rejects it and kept for a later
/// [`resume_pending_uploads`](UploadCompletionHandler::resume_pending_uploads)
/// otherwise.
pub struct FemtoBatchLogger {
    tx: Mutex<Option<Sender<PipelineCommand>>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    warner: RateLimitedWarner,
    formatter: Arc<dyn EventFormatter>,
    store: BatchStore,
    config: LoggerConfig,
}

impl FemtoBatchLogger {
    /// Start configuring a logger.
    pub fn builder() -> BatchLoggerBuilder {
        BatchLoggerBuilder::new()
    }

    pub(crate) fn start(
        config: LoggerConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        let (tx, handle) = spawn_worker(&config, &collaborators).map_err(ConfigError::Worker)?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            warner: RateLimitedWarner::default(),
            formatter: collaborators.formatter,
            store: BatchStore::new(config.storage_dir.clone()),
            config,
        })
    }

    /// Format `message` at `level` and record it.
    pub fn log(&self, level: FemtoLevel, message: &str) {
        self.record(FemtoLogEvent::new(self.formatter.format(level, message)));
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn session_identifier(&self) -> &str {
        &self.config.session_identifier
    }

    /// Batches currently persisted and not yet acknowledged, oldest first.
    pub fn pending_batches(&self) -> Vec<BatchFile> {
        self.store.list().unwrap_or_else(|err| {
            log::warn!(
                "FemtoBatchLogger: cannot list {}: {err}",
                self.store.dir().display()
            );
            Vec::new()
        })
    }

    /// Whether the worker is still accepting commands.
    pub fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    fn sender(&self) -> Option<Sender<PipelineCommand>> {
        self.tx.lock().as_ref().cloned()
    }

    fn shutdown_timeout(&self) -> Duration {
        self.config.shutdown_timeout
    }

    fn warn_dropped(&self) {
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            log::warn!("FemtoBatchLogger dropped {count} events after termination");
        });
    }

    fn request_shutdown(&self) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            return false;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(PipelineCommand::Terminate(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(self.shutdown_timeout()).is_ok()
    }

    fn join_worker(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            log::warn!("FemtoBatchLogger: worker thread panicked");
        }
    }
}

impl Recorder for FemtoBatchLogger {
    fn record(&self, event: FemtoLogEvent) {
        let Some(tx) = self.sender() else {
            self.warn_dropped();
            return;
        };
        if tx.send(PipelineCommand::Record(event)).is_err() {
            self.warn_dropped();
        }
    }

    fn flush_now(&self) -> bool {
        let Some(tx) = self.sender() else {
            return false;
        };
        self.warner.flush(|count| {
            log::warn!("FemtoBatchLogger dropped {count} events in the last interval");
        });
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(PipelineCommand::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(self.shutdown_timeout()).is_ok()
    }
}

impl Terminable for FemtoBatchLogger {
    fn notify_will_terminate(&self) {
        if self.request_shutdown() {
            self.join_worker();
        } else if self.handle.lock().is_some() {
            log::warn!(
                "FemtoBatchLogger: worker did not stop within {:?}",
                self.shutdown_timeout()
            );
        }
    }
}

impl UploadCompletionHandler for FemtoBatchLogger {
    fn register_completion(&self, session_id: &str, callback: CompletionCallback) {
        let Some(tx) = self.sender() else {
            log::debug!("FemtoBatchLogger: dropping completion callback for {session_id}");
            return;
        };
        let _ = tx.send(PipelineCommand::RegisterCompletion {
            session: session_id.to_string(),
            callback,
        });
    }

    fn resume_pending_uploads(&self) -> Option<ResumeReport> {
        let tx = self.sender()?;
        let (ack_tx, ack_rx) = bounded(1);
        tx.send(PipelineCommand::Resume(ack_tx)).ok()?;
        ack_rx.recv_timeout(self.shutdown_timeout()).ok()
    }

    fn finish_session_events(&self, session_id: &str) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(PipelineCommand::FinishSession(session_id.to_string()));
        }
    }
}

impl Drop for FemtoBatchLogger {
    fn drop(&mut self) {
        self.notify_will_terminate();
    }
}

impl std::fmt::Debug for FemtoBatchLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FemtoBatchLogger")
            .field("endpoint", &self.config.endpoint)
            .field("storage_dir", &self.config.storage_dir)
            .field("session_identifier", &self.config.session_identifier)
            .finish_non_exhaustive()
    }
}
