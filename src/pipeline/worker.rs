//! Worker thread owning the buffer, batch writer and upload dispatcher.
//!
//! Every mutation of pipeline state happens here: appends, timer and explicit
//! flushes, upload completions, resumption and completion callbacks. The
//! command channel and the flush ticker are multiplexed with `select!`, so a
//! flush can never overlap another flush or a completion.

use std::{
    collections::{BTreeMap, HashMap},
    fmt, io,
    ops::ControlFlow,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread,
};

use crossbeam_channel::{Receiver, Sender, select, tick, unbounded};
use log::{debug, warn};

use super::{Collaborators, hooks::CompletionCallback};
use crate::{
    batch::{Batch, BatchWriter},
    buffer::EventBuffer,
    config::LoggerConfig,
    log_event::FemtoLogEvent,
    rate_limited_warner::RateLimitedWarner,
    store::BatchStore,
    upload::{
        CompletionSink, ResumeReport, Submission, UploadCompletion, UploadDispatcher,
        UploadPolicy,
    },
};

/// Commands processed by the worker thread.
pub(crate) enum PipelineCommand {
    Record(FemtoLogEvent),
    Flush(Sender<()>),
    Resume(Sender<ResumeReport>),
    Completed(UploadCompletion),
    RegisterCompletion {
        session: String,
        callback: CompletionCallback,
    },
    FinishSession(String),
    Terminate(Sender<()>),
}

impl fmt::Debug for PipelineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(event) => f.debug_tuple("Record").field(event).finish(),
            Self::Flush(_) => f.write_str("Flush"),
            Self::Resume(_) => f.write_str("Resume"),
            Self::Completed(completion) => f.debug_tuple("Completed").field(completion).finish(),
            Self::RegisterCompletion { session, .. } => f
                .debug_struct("RegisterCompletion")
                .field("session", session)
                .finish_non_exhaustive(),
            Self::FinishSession(session) => f.debug_tuple("FinishSession").field(session).finish(),
            Self::Terminate(_) => f.write_str("Terminate"),
        }
    }
}

/// Spawn the pipeline worker.
///
/// Pending batches from earlier runs are resubmitted before the first command
/// is processed.
pub(crate) fn spawn_worker(
    config: &LoggerConfig,
    collaborators: &Collaborators,
) -> io::Result<(Sender<PipelineCommand>, thread::JoinHandle<()>)> {
    let (tx, rx) = unbounded();
    let completions = tx.clone();
    let sink: CompletionSink = Arc::new(move |completion| {
        let _ = completions.send(PipelineCommand::Completed(completion));
    });
    let worker = Worker::new(config, collaborators, sink);
    let handle = thread::Builder::new()
        .name("femtobatch-worker".into())
        .spawn(move || worker.run(rx))?;
    Ok((tx, handle))
}

struct Worker {
    flush_interval: std::time::Duration,
    tags: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
    strip_backslashes: bool,
    session_identifier: String,
    buffer: EventBuffer,
    writer: BatchWriter,
    dispatcher: UploadDispatcher,
    callbacks: HashMap<String, Vec<CompletionCallback>>,
    lost_batches: RateLimitedWarner,
}

impl Worker {
    fn new(config: &LoggerConfig, collaborators: &Collaborators, sink: CompletionSink) -> Self {
        let store = BatchStore::new(config.storage_dir.clone());
        let policy = UploadPolicy {
            max_batch_age: config.max_batch_age,
            allow_metered_network: config.allow_metered_network,
        };
        let dispatcher = UploadDispatcher::new(
            store.clone(),
            Arc::clone(&collaborators.transport),
            policy,
            sink,
        )
        .with_clock(Arc::clone(&collaborators.clock))
        .with_network_monitor(Arc::clone(&collaborators.network));
        Self {
            flush_interval: config.flush_interval,
            tags: config.tags.clone(),
            attributes: config.attributes.clone(),
            strip_backslashes: config.strip_backslashes,
            session_identifier: config.session_identifier.clone(),
            buffer: EventBuffer::new(),
            writer: BatchWriter::new(store),
            dispatcher,
            callbacks: HashMap::new(),
            lost_batches: RateLimitedWarner::default(),
        }
    }

    fn run(mut self, rx: Receiver<PipelineCommand>) {
        self.dispatcher.resume();
        let ticker = tick(self.flush_interval);
        loop {
            select! {
                recv(rx) -> command => {
                    let Ok(command) = command else {
                        self.flush();
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                recv(ticker) -> _ => self.flush(),
            }
        }
        self.dispatcher.flush_warnings();
        self.lost_batches.flush(|count| {
            warn!("FemtoBatchLogger: discarded {count} batches that could not be persisted");
        });
        debug!("FemtoBatchLogger: worker stopped");
    }

    fn handle_command(&mut self, command: PipelineCommand) -> ControlFlow<()> {
        match command {
            PipelineCommand::Record(event) => self.append(event),
            PipelineCommand::Flush(ack) => {
                self.flush();
                let _ = ack.send(());
            }
            PipelineCommand::Resume(ack) => {
                let report = self.dispatcher.resume();
                let _ = ack.send(report);
                self.notify_if_idle();
            }
            PipelineCommand::Completed(completion) => {
                self.dispatcher.handle_completion(completion);
                self.notify_if_idle();
            }
            PipelineCommand::RegisterCompletion { session, callback } => {
                self.callbacks.entry(session).or_default().push(callback);
                self.notify_if_idle();
            }
            PipelineCommand::FinishSession(session) => self.finish_session(&session),
            PipelineCommand::Terminate(ack) => {
                self.flush();
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn append(&mut self, event: FemtoLogEvent) {
        let mut event = event.with_default_attributes(&self.attributes);
        if self.strip_backslashes {
            event = event.without_backslashes();
        }
        self.buffer.append(event);
    }

    /// Move every buffered event into a new batch and submit it.
    fn flush(&mut self) {
        let Some(events) = self.buffer.drain_all() else {
            return;
        };
        let batch = Batch::new(self.tags.clone(), events);
        let file = match self.writer.write(&batch) {
            Ok(file) => file,
            Err(err) => {
                self.lost_batches.record_drop();
                self.lost_batches.warn_if_due(|count| {
                    warn!(
                        "FemtoBatchLogger: discarded {count} batches that could not be persisted (latest: {err})"
                    );
                });
                return;
            }
        };
        if self.dispatcher.submit(&file) != Submission::Started {
            self.notify_if_idle();
        }
    }

    fn notify_if_idle(&mut self) {
        if !self.dispatcher.is_idle() {
            return;
        }
        let session = self.session_identifier.clone();
        self.finish_session(&session);
    }

    fn finish_session(&mut self, session: &str) {
        let Some(callbacks) = self.callbacks.remove(session) else {
            return;
        };
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                warn!("FemtoBatchLogger: completion callback for {session} panicked");
            }
        }
    }
}
