//! Convergence polling
//!
//! Blocks until a readiness check reports `true`. There is deliberately no
//! attempt limit and no overall timeout: a control plane that never
//! converges keeps the caller waiting until the process is stopped.
//!
//! # Example
//!
//! ```ignore
//! use stackpilot::poll::await_condition;
//!
//! await_condition("deployment scaled", DEFAULT_POLL_INTERVAL, || async {
//!     let d = ops::get::<Deployment>(&cp, &handle).await?;
//!     Ok(observed_replicas(&d) == 2)
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Poll `check` until it reports ready or fails.
///
/// `check` runs immediately, then again after each `interval` of sleep.
/// `Ok(true)` ends the wait successfully and `Ok(false)` keeps waiting. An
/// `Err` ends the wait at once and is handed back to the caller.
///
/// # Arguments
/// * `description` - What is being waited for, used in log fields
/// * `interval` - Sleep between consecutive checks
/// * `check` - Async readiness predicate
///
/// # Returns
/// The number of checks performed once ready, or the first check error.
pub async fn await_condition<F, Fut, E>(
    description: &str,
    interval: Duration,
    mut check: F,
) -> Result<u32, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);

        match check().await {
            Ok(true) => {
                debug!(condition = %description, attempt, "Condition met");
                return Ok(attempt);
            }
            Ok(false) => {
                debug!(
                    condition = %description,
                    attempt,
                    retry_in = ?interval,
                    "Condition not met yet"
                );
            }
            Err(e) => {
                warn!(condition = %description, attempt, error = %e, "Condition check failed");
                return Err(e);
            }
        }

        tokio::time::sleep(interval).await;
    }
}
