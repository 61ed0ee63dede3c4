//! Request validation for control writes.
//!
//! Every check here runs before any hardware access; a rejected request has
//! no side effect.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::traits::{ControlError, Result, VideoControl};

/// Minimum spacing of state-mutating requests.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Check that `value` may be written to `control`.
///
/// # Errors
///
/// - `ReadOnly` if the control cannot be written
/// - `OutOfRange` if the value lies outside `[minimum, maximum]`
/// - `StepMisaligned` if the step is above 1 and the value is not a whole
///   number of steps from the minimum
pub fn validate_write(control: &VideoControl, value: i64) -> Result<()> {
    if control.read_only {
        return Err(ControlError::ReadOnly {
            name: control.name.clone(),
        });
    }

    let minimum = i64::from(control.minimum);
    let maximum = i64::from(control.maximum);
    if value < minimum || value > maximum {
        return Err(ControlError::OutOfRange {
            value,
            minimum,
            maximum,
        });
    }

    if control.step > 1 && (value - minimum) % i64::from(control.step) != 0 {
        return Err(ControlError::StepMisaligned {
            value,
            step: control.step,
            minimum: control.minimum,
        });
    }

    Ok(())
}

/// Global rate limiter shared by all state-mutating requests.
///
/// A request is admitted only if at least `min_interval` has passed since the
/// previous admitted request. Read and refresh requests bypass it.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT)
    }
}

impl RateLimiter {
    /// A limiter with the given minimum spacing.
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Admit a request arriving at `now`.
    ///
    /// `gate` runs the request's own validation while the limiter is held;
    /// the arrival time is recorded only if it succeeds, so rejected requests
    /// do not push back the next window.
    pub fn admit<T, F>(&self, now: Instant, gate: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last {
            let elapsed = now.saturating_duration_since(previous);
            if elapsed < self.min_interval {
                debug!(elapsed_ms = elapsed.as_millis(), "Request rate limited");
                return Err(ControlError::RateLimited);
            }
        }
        let admitted = gate()?;
        *last = Some(now);
        Ok(admitted)
    }
}
