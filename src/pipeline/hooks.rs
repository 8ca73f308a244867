//! Host-facing interfaces.
//!
//! The pipeline exposes three small capabilities instead of one large trait.
//! A host that only needs to feed events depends on [`Recorder`]; lifecycle
//! glue depends on [`Terminable`] and [`UploadCompletionHandler`].
//! [`HostHooks`] adapts any type offering all three to the three
//! notifications a host environment typically delivers.

use crate::log_event::FemtoLogEvent;
use crate::upload::ResumeReport;

/// One-shot callback run when an upload session has drained.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Accepts events for upload.
pub trait Recorder: Send + Sync {
    /// Buffer `event`. Never blocks on I/O and never reports failure.
    fn record(&self, event: FemtoLogEvent);

    /// Write buffered events to a batch and start its upload.
    ///
    /// Returns `true` when the batch was persisted (or there was nothing to
    /// write) before the shutdown timeout elapsed.
    fn flush_now(&self) -> bool;
}

pub trait Terminable: Send + Sync {
    /// Persist buffered events and stop accepting new ones.
    ///
    /// Uploads already in flight are not awaited; their batches are retried
    /// on the next resumption.
    fn notify_will_terminate(&self);
}

/// Completion bookkeeping for background upload sessions.
pub trait UploadCompletionHandler: Send + Sync {
    /// Run `callback` once every upload of `session_id` has completed.
    fn register_completion(&self, session_id: &str, callback: CompletionCallback);

    /// Cancel in-flight uploads and resubmit every batch on disk.
    ///
    /// Returns `None` if the pipeline has stopped or did not answer in time.
    fn resume_pending_uploads(&self) -> Option<ResumeReport>;

    /// Run and discard the callbacks registered for `session_id`.
    fn finish_session_events(&self, session_id: &str);
}

/// Notifications a host environment delivers to its logger.
pub trait HostHooks {
    fn on_record(&self, event: FemtoLogEvent);
    fn on_terminate(&self);
    fn on_network_session_restored(&self);
}

impl<T> HostHooks for T
where
    T: Recorder + Terminable + UploadCompletionHandler,
{
    fn on_record(&self, event: FemtoLogEvent) {
        self.record(event);
    }

    fn on_terminate(&self) {
        self.notify_will_terminate();
    }

    fn on_network_session_restored(&self) {
        if self.resume_pending_uploads().is_none() {
            log::debug!("HostHooks: resumption was not acknowledged");
        }
    }
}
