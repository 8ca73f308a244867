//! Network condition reporting for upload gating.
//!
//! When a logger is configured to avoid metered connections, the dispatcher
//! asks its [`NetworkMonitor`] before every upload and defers the batch if the
//! current connection is metered. Deferred batches stay on disk and are picked
//! up by the next resumption pass.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait NetworkMonitor: Send + Sync {
    /// Whether the active connection is billed by volume (e.g. cellular).
    fn is_metered(&self) -> bool;
}

/// Host-updated network state.
///
/// Hosts that observe connectivity changes flip the flag with
/// [`set_metered`](Self::set_metered); the default is unmetered.
#[derive(Debug, Default)]
pub struct NetworkStatus {
    metered: AtomicBool,
}

impl NetworkStatus {
    pub fn new(metered: bool) -> Self {
        Self {
            metered: AtomicBool::new(metered),
        }
    }

    pub fn set_metered(&self, metered: bool) {
        self.metered.store(metered, Ordering::Relaxed);
    }
}

impl NetworkMonitor for NetworkStatus {
    fn is_metered(&self) -> bool {
        self.metered.load(Ordering::Relaxed)
    }
}
