//! Test helpers shared by unit and integration tests.
//!
//! Compiled for unit tests and, through the `test-util` feature, for the
//! integration suites under `tests/`.

pub mod scripted_transport;

use std::thread;
use std::time::{Duration, Instant};

pub use scripted_transport::{
    Gate, GatedTransport, RecordedUpload, ScriptedResponse, ScriptedTransport,
};

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
