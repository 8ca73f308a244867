//! Asynchronous delivery of persisted batches.
//!
//! Each submitted batch is uploaded on its own background thread with an HTTP
//! POST carrying `Content-Type: application/json` and a bearer token. The
//! outcome decides the fate of the batch file:
//!
//! - **2xx**: delivered - delete the file.
//! - **4xx**: rejected - delete the file; retrying cannot help.
//! - **Other status, network error, timeout**: transient - keep the file for
//!   the next resumption pass unless it is older than the retention limit.
//!
//! There is no in-process retry loop. Retries happen when the host resumes
//! pending uploads, typically on the next launch or after reconnecting.

mod dispatcher;
mod transport;

#[cfg(test)]
mod tests;

pub use dispatcher::{
    CompletionAction, CompletionSink, ResumeReport, Submission, UploadCompletion,
    UploadDispatcher, UploadPolicy,
};
pub use transport::{ResponseClass, Transport, TransportError, UreqTransport, classify_status};
