//! Transports that answer from a script instead of the network.
//!
//! Shared by unit tests and the integration suites so every test drives the
//! dispatcher with the same doubles.

use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::batch::BatchId;
use crate::upload::{Transport, TransportError};

/// Canned reply for one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedResponse {
    Status(u16),
    Timeout,
    NetworkFailure,
}

impl ScriptedResponse {
    fn into_result(self) -> Result<u16, TransportError> {
        match self {
            ScriptedResponse::Status(code) => Ok(code),
            ScriptedResponse::Timeout => Err(TransportError::Timeout),
            ScriptedResponse::NetworkFailure => {
                Err(TransportError::Network("connection refused".into()))
            }
        }
    }
}

/// An upload observed by a scripted transport.
#[derive(Clone, Debug)]
pub struct RecordedUpload {
    pub batch: BatchId,
    pub body: Vec<u8>,
}

/// Replies with queued responses, then with a fallback, recording every
/// request it sees.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedResponse>>,
    fallback: ScriptedResponse,
    uploads: Mutex<Vec<RecordedUpload>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::replying(ScriptedResponse::Status(200))
    }
}

impl ScriptedTransport {
    /// Accept every upload with `200 OK`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every unscripted upload with `fallback`.
    pub fn replying(fallback: ScriptedResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Queue `response` for the next unanswered upload.
    pub fn then(self, response: ScriptedResponse) -> Self {
        self.script.lock().push_back(response);
        self
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn uploads_for(&self, batch: BatchId) -> usize {
        self.uploads
            .lock()
            .iter()
            .filter(|upload| upload.batch == batch)
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn post(&self, batch: BatchId, body: &[u8]) -> Result<u16, TransportError> {
        self.uploads.lock().push(RecordedUpload {
            batch,
            body: body.to_vec(),
        });
        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        response.into_result()
    }
}

/// Holds every upload until the test releases it.
#[derive(Debug)]
pub struct GatedTransport {
    inner: ScriptedTransport,
    gate: Receiver<()>,
    entered: Sender<BatchId>,
}

/// Controls for a [`GatedTransport`].
#[derive(Debug)]
pub struct Gate {
    release: Sender<()>,
    entered: Receiver<BatchId>,
}

impl Gate {
    /// Let one held upload proceed.
    pub fn release_one(&self) {
        let _ = self.release.send(());
    }

    /// Wait until an upload reaches the gate.
    pub fn wait_entered(&self, timeout: std::time::Duration) -> Option<BatchId> {
        self.entered.recv_timeout(timeout).ok()
    }
}

impl GatedTransport {
    pub fn new(inner: ScriptedTransport) -> (Self, Gate) {
        let (release, gate) = unbounded();
        let (entered_tx, entered_rx) = unbounded();
        (
            Self {
                inner,
                gate,
                entered: entered_tx,
            },
            Gate {
                release,
                entered: entered_rx,
            },
        )
    }

    pub fn inner(&self) -> &ScriptedTransport {
        &self.inner
    }
}

impl Transport for GatedTransport {
    fn post(&self, batch: BatchId, body: &[u8]) -> Result<u16, TransportError> {
        let _ = self.entered.send(batch);
        if self.gate.recv().is_err() {
            return Err(TransportError::Network("gate closed".into()));
        }
        self.inner.post(batch, body)
    }
}
