//! Retry with error classification.
//!
//! [`run`] executes an async operation and, when it fails, asks a classifier
//! whether the error is worth another attempt. Every call owns its own attempt
//! counter, so nested layers (connection level around per-message level) keep
//! independent budgets.
//!
//! Between attempts the [`Backoff`] of the policy is applied: exponential,
//! capped, with jitter. `Backoff::none()` retries immediately.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use rand::Rng;

use crate::utils::error::{Error, HandlerError};

/// Decision returned by a classifier for an observed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    Fatal,
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: false,
        }
    }

    /// `base * 2^(attempt - 1)`, capped at `max`, jittered into `[delay/2, delay]`.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);
        if !self.jitter {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        let low = millis / 2;
        Duration::from_millis(rand::rng().random_range(low..=millis))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(200), Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: NonZeroU32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::default(),
        }
    }

    /// Convenience constructor; zero is treated as a single attempt.
    pub fn attempts(max_attempts: u32) -> Self {
        Self::new(NonZeroU32::new(max_attempts).unwrap_or(NonZeroU32::MIN))
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::attempts(5)
    }
}

/// Runs `operation` until it succeeds, the classifier reports
/// [`Verdict::Fatal`], or `policy.max_attempts()` attempts have failed.
///
/// The last error is returned in the two failure cases.
pub async fn run<T, E, Op, Fut, C>(mut operation: Op, classifier: C, policy: &RetryPolicy) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Verdict,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.get();
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if classifier(&err) == Verdict::Fatal {
            return Err(err);
        }
        if attempt >= max_attempts {
            tracing::warn!(attempt, max_attempts, "giving up: {err}");
            return Err(err);
        }

        let delay = policy.backoff.delay(attempt);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "retrying after: {err}"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

/// Connection-layer classifier.
///
/// Transient transport failures and handler escalations lead to a reconnect;
/// configuration, codec and protocol errors stop the worker.
pub fn connection_verdict(err: &Error) -> Verdict {
    match err {
        Error::Transport(transport) if transport.is_transient() => Verdict::Retryable,
        Error::Handler(HandlerError::Failed(_)) => Verdict::Retryable,
        _ => Verdict::Fatal,
    }
}

/// Per-message classifier.
///
/// `Retryable` here means the subscriber recovers and moves on to the next
/// delivery; the same message is never reprocessed.
pub fn message_verdict(err: &HandlerError) -> Verdict {
    match err {
        HandlerError::Malformed(_) => Verdict::Retryable,
        HandlerError::Failed(_) => Verdict::Fatal,
    }
}

#[cfg(test)]
mod tests;
