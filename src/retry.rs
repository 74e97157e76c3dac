//! Retry loop shared by all external pipeline stages
//!

use std::fmt::Display;

use log::{info, warn};

/// Run `stage` until it succeeds, calling `recover` after every failure
///
/// Attempts are neither limited nor delayed, so a persistently failing stage is retried forever
/// with each failure logged.
///
pub fn retry_until_success<T, E: Display>(
    label: &str,
    mut stage: impl FnMut() -> Result<T, E>,
    mut recover: impl FnMut(),
) -> T {
    let mut attempt = 1;
    loop {
        match stage() {
            Ok(x) => {
                if attempt > 1 {
                    info!("{label} succeeded on attempt {attempt}");
                }
                return x;
            }
            Err(e) => {
                warn!("{label} failed on attempt {attempt}: {e}");
                recover();
                attempt += 1;
            }
        }
    }
}
