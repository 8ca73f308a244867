//! HTTP transport used by upload tasks.
//!
//! The dispatcher only needs "POST these bytes, tell me the status". That
//! seam is the [`Transport`] trait so hosts and tests can swap in their own
//! client; [`UreqTransport`] is the production implementation.

use std::{error::Error as _, io, sync::Arc, time::Duration};

use thiserror::Error;
use ureq::{Agent, AgentBuilder};

use crate::batch::BatchId;

/// Failure to obtain any HTTP status for an upload.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network failure: {0}")]
    Network(String),
}

/// Sends batch payloads to the ingest endpoint.
pub trait Transport: Send + Sync {
    /// POST `body` and return the HTTP status code.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no response was received.
    fn post(&self, batch: BatchId, body: &[u8]) -> Result<u16, TransportError>;
}

/// Classification of a response for batch retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx - the endpoint accepted the batch.
    Success,
    /// 4xx - the batch will never be accepted.
    Rejected,
    /// Anything else - worth another attempt later.
    Transient,
}

/// Classifies an HTTP status code.
///
/// * **2xx** → [`ResponseClass::Success`]
/// * **4xx** → [`ResponseClass::Rejected`]
/// * **Other** → [`ResponseClass::Transient`]
pub fn classify_status(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        400..=499 => ResponseClass::Rejected,
        _ => ResponseClass::Transient,
    }
}

/// Blocking HTTP client backed by a shared `ureq` agent.
///
/// The agent pools connections across upload threads, so every concurrent
/// upload shares one TLS configuration and timeout policy.
pub struct UreqTransport {
    agent: Agent,
    endpoint: String,
    authorization: String,
}

impl UreqTransport {
    /// Build a transport that authenticates with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform TLS connector cannot be initialised.
    pub fn new(
        endpoint: impl Into<String>,
        token: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, native_tls::Error> {
        let connector = native_tls::TlsConnector::new()?;
        let agent = AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout(request_timeout)
            .tls_connector(Arc::new(connector))
            .build();
        Ok(Self {
            agent,
            endpoint: endpoint.into(),
            authorization: format!("Bearer {token}"),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for UreqTransport {
    fn post(&self, _batch: BatchId, body: &[u8]) -> Result<u16, TransportError> {
        let result = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("Authorization", &self.authorization)
            .send_bytes(body);
        match result {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(code, _)) => Ok(code),
            Err(ureq::Error::Transport(transport)) => Err(transport_error(&transport)),
        }
    }
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn transport_error(transport: &ureq::Transport) -> TransportError {
    let timed_out = transport
        .source()
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|err| {
            matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            )
        });
    if timed_out {
        TransportError::Timeout
    } else {
        TransportError::Network(transport.to_string())
    }
}
