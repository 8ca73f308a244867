//! Durable, batched log uploading.
//!
//! Formatted log lines are buffered in memory, written periodically to
//! immutable `<uuid>.data` batch files and uploaded in the background to an
//! HTTP ingest endpoint. Accepted and rejected batches are deleted; batches
//! that hit a transient failure stay on disk until a later resumption
//! delivers them or they exceed the retention age.
//!
//! ```no_run
//! use femtobatch::{FemtoBatchLogger, FemtoLevel, Terminable};
//!
//! let logger = FemtoBatchLogger::builder()
//!     .with_access_token("ingest-token")
//!     .with_dataspace("my-dataspace")
//!     .build()?;
//! logger.log(FemtoLevel::Info, "service started");
//! logger.notify_will_terminate();
//! # Ok::<(), femtobatch::ConfigError>(())
//! ```

pub mod batch;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod formatter;
pub mod level;
pub mod log_event;
pub mod network;
pub mod pipeline;
pub mod platform;
pub mod rate_limited_warner;
pub mod store;
pub mod upload;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use batch::{
    Batch, BatchError, BatchId, BatchWriter, DecodedBatch, decode_payload, serialise_batch,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BatchLoggerBuilder, ConfigError, LoggerConfig};
pub use formatter::{EventFormatter, KeyValueFormatter};
pub use level::FemtoLevel;
pub use log_event::FemtoLogEvent;
pub use network::{NetworkMonitor, NetworkStatus};
pub use pipeline::{
    CompletionCallback, FemtoBatchLogger, HostHooks, Recorder, Terminable,
    UploadCompletionHandler,
};
pub use platform::{HostPlatform, NoPlatformTags, PlatformInfo};
pub use store::{BatchFile, BatchStore};
pub use upload::{ResumeReport, Transport, TransportError, UreqTransport};
