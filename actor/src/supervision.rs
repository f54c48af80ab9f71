// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervision
//!
//! Restart policy applied when an actor faults, either while starting or because a
//! handler (synchronous or deferred) raised a failure.
//!

use std::{fmt::Debug, time::Duration};

use backoff::backoff::Backoff as InnerBackoff;

/// Trait to define a RetryStrategy. You can use this trait to define your
/// custom retry strategy.
pub trait RetryStrategy: Debug + Send + Sync {
    /// Maximum number of consecutive restarts.
    fn max_retries(&self) -> usize;
    /// Wait before the next restart, if any.
    fn next_backoff(&mut self) -> Option<Duration>;
    /// Called after a restart succeeded.
    fn reset(&mut self) {}
}

/// A SupervisionStrategy defines what to do when an actor faults.
/// With Stop the actor is stopped. With Retry it is restarted according to the
/// retry strategy.
#[derive(Debug)]
pub enum SupervisionStrategy {
    /// Stop the actor.
    Stop,
    /// Restart the actor.
    Retry(Strategy),
}

/// Built-in retry strategies.
#[derive(Debug)]
pub enum Strategy {
    /// Restart immediately.
    NoInterval(NoIntervalStrategy),
    /// Restart after a fixed wait.
    FixedInterval(FixedIntervalStrategy),
    /// Restart after an exponentially growing wait.
    ExponentialBackoff(ExponentialBackoffStrategy),
}

impl RetryStrategy for Strategy {
    fn max_retries(&self) -> usize {
        match self {
            Strategy::NoInterval(strategy) => strategy.max_retries(),
            Strategy::FixedInterval(strategy) => strategy.max_retries(),
            Strategy::ExponentialBackoff(strategy) => strategy.max_retries(),
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        match self {
            Strategy::NoInterval(strategy) => strategy.next_backoff(),
            Strategy::FixedInterval(strategy) => strategy.next_backoff(),
            Strategy::ExponentialBackoff(strategy) => strategy.next_backoff(),
        }
    }

    fn reset(&mut self) {
        if let Strategy::ExponentialBackoff(strategy) = self {
            strategy.reset();
        }
    }
}

/// A retry strategy that immediately retries an actor that failed.
#[derive(Debug, Default)]
pub struct NoIntervalStrategy {
    max_retries: usize,
}

impl NoIntervalStrategy {
    pub fn new(max_retries: usize) -> Self {
        NoIntervalStrategy { max_retries }
    }
}

impl RetryStrategy for NoIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// A retry strategy that retries an actor with a fixed wait period.
#[derive(Debug, Default)]
pub struct FixedIntervalStrategy {
    max_retries: usize,
    duration: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(max_retries: usize, duration: Duration) -> Self {
        FixedIntervalStrategy {
            max_retries,
            duration,
        }
    }
}

impl RetryStrategy for FixedIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// A retry strategy that retries an actor with an exponential backoff wait
/// period before each retry.
#[derive(Debug, Default)]
pub struct ExponentialBackoffStrategy {
    max_retries: usize,
    inner: backoff::ExponentialBackoff,
}

impl ExponentialBackoffStrategy {
    pub fn new(max_retries: usize) -> Self {
        ExponentialBackoffStrategy {
            max_retries,
            inner: backoff::ExponentialBackoff::default(),
        }
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_no_interval_strategy() {
        let mut strategy = NoIntervalStrategy::new(3);
        assert_eq!(strategy.max_retries(), 3);
        assert_eq!(strategy.next_backoff(), None);
    }

    #[test]
    fn test_fixed_interval_strategy() {
        let mut strategy = Strategy::FixedInterval(FixedIntervalStrategy::new(
            3,
            Duration::from_secs(1),
        ));
        assert_eq!(strategy.max_retries(), 3);
        assert_eq!(strategy.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_exponential_backoff_strategy() {
        let mut strategy =
            Strategy::ExponentialBackoff(ExponentialBackoffStrategy::new(3));
        assert_eq!(strategy.max_retries(), 3);
        assert!(strategy.next_backoff().is_some());
        strategy.reset();
        assert!(strategy.next_backoff().is_some());
    }
}
