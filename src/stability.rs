//! Detect when a newly-appeared file has finished being written
//!
//! Read batch files are copied into the monitored directory by the sequencer, so a file can be
//! observed long before it is complete. A file is only admitted after its size has been sampled
//! as unchanged for a configured number of consecutive checks.
//!

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use camino::Utf8Path;

/// Cooperative cancellation shared between a controlling thread and its polling loops
///
/// Waiting on the token returns early as soon as it is cancelled, so periodic checks never have
/// to sleep out their full interval during shutdown.
///
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (cancelled, cvar) = &*self.inner;
        *cancelled.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Block for up to `timeout`, returning true if the token is cancelled
    ///
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (cancelled, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = cancelled.lock().unwrap();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = cvar.wait_timeout(cancelled, deadline - now).unwrap().0;
        }
        *cancelled
    }
}

/// Poll `sampler` until it reports the same size on `required_stable_samples` consecutive
/// checks after the first reading
///
/// A `None` sample represents an inaccessible file, and always resets the stability count.
///
/// Returns true once the size is stable, or false if `cancel` fires first.
///
pub fn wait_for_stable_size(
    mut sampler: impl FnMut() -> Option<u64>,
    check_interval: Duration,
    required_stable_samples: u32,
    cancel: &CancelToken,
) -> bool {
    let mut previous_size = None;
    let mut stable_count = 0;
    while stable_count < required_stable_samples {
        let current_size = sampler();
        if current_size.is_some() && current_size == previous_size {
            stable_count += 1;
        } else {
            stable_count = 0;
            previous_size = current_size;
        }

        if cancel.wait_timeout(check_interval) {
            return false;
        }
    }
    true
}

/// Block until the file size at `path` has stopped changing
///
pub fn is_file_complete(
    path: &Utf8Path,
    check_interval: Duration,
    required_stable_samples: u32,
    cancel: &CancelToken,
) -> bool {
    wait_for_stable_size(
        || std::fs::metadata(path).ok().map(|x| x.len()),
        check_interval,
        required_stable_samples,
        cancel,
    )
}
