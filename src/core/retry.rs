//! Bounded retry for transient network failures.

use crate::core::error::{FailureClass, SynthesisError, classify_failure};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Attempts per operation before the id is abandoned.
pub const MAX_ATTEMPTS: u32 = 3;
/// Cooldown between attempts.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Run `f` until it succeeds, fails non-transiently, or exhausts `policy.max_attempts`.
pub fn with_retry<F, R>(policy: RetryPolicy, op: &str, mut f: F) -> Result<R, SynthesisError>
where
    F: FnMut() -> Result<R, SynthesisError>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f() {
            Ok(v) => return Ok(v),
            Err(e)
                if classify_failure(&e) == FailureClass::Transient
                    && attempt < policy.max_attempts =>
            {
                warn!(op, attempt, max = policy.max_attempts, error = %e, "transient failure; cooling down");
                thread::sleep(policy.cooldown);
            }
            Err(e) => return Err(e),
        }
    }
}
