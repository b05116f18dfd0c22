//! Bounded retries with capped exponential backoff.

use std::time::Duration;

use tracing::warn;

use crate::cancel::Ctx;

pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// `base * 2^(attempt-1)`, capped at [`MAX_BACKOFF`]. A zero base counts as
/// one second and attempts below 1 count as 1.
pub fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    let base = if base.is_zero() {
        Duration::from_secs(1)
    } else {
        base
    };
    let mut delay = base;
    for _ in 1..attempt.max(1) {
        if delay >= MAX_BACKOFF {
            break;
        }
        delay = delay.saturating_mul(2);
    }
    delay.min(MAX_BACKOFF)
}

/// Retry settings taken from the loop config.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_max: u32,
    pub turn_timeout: Duration,
    pub retry_base: Duration,
}

impl RetryPolicy {
    /// Call `step` up to `retry_max` times, each under a fresh `turn_timeout`
    /// deadline derived from `ctx`.
    ///
    /// Cancellation of `ctx` ends the retries early with the cancellation
    /// error. Exhausted retries return the last failure with the context
    /// `"<label> turn failed after retries"`, so typed causes still downcast.
    pub fn run<T>(
        &self,
        ctx: &Ctx,
        label: &str,
        mut step: impl FnMut(&Ctx) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let attempts = self.retry_max.max(1);
        let mut attempt = 1;
        loop {
            ctx.check()?;
            let step_ctx = ctx.with_timeout(self.turn_timeout);
            let err = match step(&step_ctx) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if let Some(cancelled) = ctx.err() {
                return Err(err.context(cancelled));
            }
            if attempt >= attempts {
                return Err(err.context(format!("{label} turn failed after retries")));
            }
            let backoff = retry_backoff(self.retry_base, attempt);
            warn!(
                label,
                attempt,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                error = %format!("{err:#}"),
                "turn step failed, retrying"
            );
            ctx.sleep(backoff)?;
            attempt += 1;
        }
    }
}
