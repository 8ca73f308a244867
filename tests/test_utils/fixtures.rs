//! Fixtures that pair a logger builder with a scratch storage directory, a
//! manual clock and an in-memory transport, so pipeline scenarios run without
//! touching the network.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;
use femtobatch::test_utils::ScriptedTransport;
use femtobatch::{
    BatchLoggerBuilder, BatchStore, FemtoBatchLogger, ManualClock, NoPlatformTags, Transport,
    UploadCompletionHandler,
};
use rstest::fixture;
use tempfile::TempDir;

/// Upper bound for any wait in the integration suites.
pub const WAIT: Duration = Duration::from_secs(5);

pub const MAX_AGE: Duration = Duration::from_secs(600);

pub struct PipelineEnv {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
}

impl PipelineEnv {
    pub fn store(&self) -> BatchStore {
        BatchStore::new(self.dir.path())
    }

    /// A builder wired to this environment; timer flushes are effectively
    /// disabled so scenarios flush explicitly.
    pub fn builder(&self, transport: Arc<dyn Transport>) -> BatchLoggerBuilder {
        FemtoBatchLogger::builder()
            .with_access_token("integration-token")
            .with_dataspace("integration")
            .with_storage_dir(self.dir.path())
            .with_flush_interval(Duration::from_secs(3_600))
            .with_max_batch_age(MAX_AGE)
            .with_platform(Arc::new(NoPlatformTags))
            .with_clock(self.clock.clone())
            .with_transport(transport)
    }

    pub fn logger(&self, transport: &Arc<ScriptedTransport>) -> FemtoBatchLogger {
        self.builder(transport.clone()).build().expect("logger")
    }
}

#[fixture]
pub fn env() -> PipelineEnv {
    PipelineEnv {
        dir: tempfile::tempdir().expect("tempdir"),
        clock: Arc::new(ManualClock::new()),
    }
}

/// Block until every upload of `logger`'s own session has been handled.
pub fn await_session_drained(logger: &FemtoBatchLogger) {
    let (tx, rx) = unbounded();
    logger.register_completion(
        logger.session_identifier(),
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    rx.recv_timeout(WAIT).expect("session drained");
}
