use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::stability::CancelToken;

/// Run-wide state shared by reference between the controller, the watcher and the worker
///
/// The stop flag has a single writer (the merge evaluator) and is never cleared once set. The
/// last admission time is refreshed by the watcher whenever it admits a new read batch.
///
pub struct RunSignals {
    stop: AtomicBool,
    stop_wake: CancelToken,
    last_admission: Mutex<Instant>,
}

impl Default for RunSignals {
    fn default() -> Self {
        Self {
            stop: AtomicBool::new(false),
            stop_wake: CancelToken::new(),
            last_admission: Mutex::new(Instant::now()),
        }
    }
}

impl RunSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.stop_wake.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Block for up to `timeout`, returning early with true if stop is requested
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        self.stop_wake.wait_timeout(timeout) || self.is_stop_requested()
    }

    pub fn note_admission(&self) {
        *self.last_admission.lock().unwrap() = Instant::now();
    }

    /// Time elapsed since the last admitted read batch, or since the run started
    pub fn idle_duration(&self) -> Duration {
        self.last_admission.lock().unwrap().elapsed()
    }
}
