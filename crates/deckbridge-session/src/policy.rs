//! Reconnect policies.

use std::{fmt, time::Duration};

use deckbridge_core::{Backoff, ReconnectConfig};

/// Decides when to retry after the connection drops.
pub trait ReconnectPolicy: fmt::Debug + Send + Sync {
    /// Delay before retrying after `attempt` consecutive drops (1-based),
    /// or `None` to stop retrying.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Retry at once, forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl ReconnectPolicy for Immediate {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Retry after the same delay every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(self.0)
    }
}

/// Double the delay after each drop, up to `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let factor = 1_u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}

/// Stop after `max` consecutive drops.
#[derive(Debug, Clone, Copy)]
pub struct MaxAttempts<P> {
    pub inner: P,
    pub max: u32,
}

impl<P: ReconnectPolicy> ReconnectPolicy for MaxAttempts<P> {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max {
            return None;
        }
        self.inner.next_delay(attempt)
    }
}

/// Build the policy described by `config`.
#[must_use]
pub fn from_config(config: &ReconnectConfig) -> Box<dyn ReconnectPolicy> {
    match (config.backoff, config.max_attempts) {
        (Backoff::Immediate, None) => Box::new(Immediate),
        (Backoff::Immediate, Some(max)) => Box::new(MaxAttempts { inner: Immediate, max }),
        (Backoff::Fixed { delay_ms }, max) => capped(FixedDelay(Duration::from_millis(delay_ms)), max),
        (Backoff::Exponential { initial_ms, max_ms }, max) => capped(
            ExponentialBackoff {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
            },
            max,
        ),
    }
}

fn capped<P: ReconnectPolicy + 'static>(policy: P, max: Option<u32>) -> Box<dyn ReconnectPolicy> {
    match max {
        Some(max) => Box::new(MaxAttempts { inner: policy, max }),
        None => Box::new(policy),
    }
}
