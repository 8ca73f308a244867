//! Logger configuration.
//!
//! [`LoggerConfig`] is the validated, read-only configuration handed to the
//! pipeline worker. Callers normally obtain one through
//! [`BatchLoggerBuilder`], either by calling its fluent setters or by loading
//! an INI file with [`BatchLoggerBuilder::from_ini_file`].

mod builder;
mod ini_loader;

#[cfg(test)]
mod tests;

use std::{collections::BTreeMap, io, path::PathBuf, time::Duration};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use thiserror::Error;

pub use builder::BatchLoggerBuilder;
pub use ini_loader::{INI_SECTION, INI_TAGS_SECTION};

/// Ingest host used when only a dataspace is configured.
pub const DEFAULT_INGEST_BASE: &str = "https://cloud.humio.com";
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
/// Seven days.
pub const DEFAULT_MAX_BATCH_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on how long flush and termination wait for the worker.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SESSION_IDENTIFIER: &str = "femtobatch.uploads";
/// Name of the storage directory created under the system temp directory.
pub const DEFAULT_STORAGE_DIR_NAME: &str = "femtobatch";

/// Characters escaped when a dataspace is placed in the ingest path.
///
/// Everything outside the RFC 3986 unreserved set is encoded so a dataspace
/// name can never introduce a new path segment or query string.
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Build the ingest URL for `dataspace` on `base`.
pub fn dataspace_endpoint(base: &str, dataspace: &str) -> String {
    format!(
        "{}/api/v1/dataspaces/{}/ingest",
        base.trim_end_matches('/'),
        utf8_percent_encode(dataspace, PATH_SEGMENT_ENCODE_SET)
    )
}

/// Errors raised while assembling a logger.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("an access token is required")]
    MissingToken,
    #[error("either a dataspace or an endpoint must be configured")]
    MissingEndpoint,
    /// Invalid user supplied configuration.
    #[error("invalid logger configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid INI configuration: {0}")]
    Ini(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage directory {path} is unusable: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to initialise TLS: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("failed to start pipeline worker: {0}")]
    Worker(#[source] io::Error),
}

/// Validated settings for one batch logger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggerConfig {
    pub endpoint: String,
    pub access_token: String,
    /// Directory holding `<uuid>.data` batch files.
    pub storage_dir: PathBuf,
    pub flush_interval: Duration,
    /// Batches at least this old are discarded rather than retried.
    pub max_batch_age: Duration,
    pub allow_metered_network: bool,
    pub strip_backslashes: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Sent once per batch.
    pub tags: BTreeMap<String, String>,
    /// Merged into every event.
    pub attributes: BTreeMap<String, String>,
    /// Identifies this logger's upload session to completion callbacks.
    pub session_identifier: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_token: String::new(),
            storage_dir: std::env::temp_dir().join(DEFAULT_STORAGE_DIR_NAME),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch_age: DEFAULT_MAX_BATCH_AGE,
            allow_metered_network: true,
            strip_backslashes: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            tags: BTreeMap::new(),
            attributes: BTreeMap::new(),
            session_identifier: DEFAULT_SESSION_IDENTIFIER.to_string(),
        }
    }
}
