use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// How the previous model call in a batching stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Succeeded,
    Failed,
}

/// Spacing between consecutive model calls of one stage. Stages call
/// `pause` between batches, never after the last one.
#[async_trait]
pub trait PacingPolicy: Send + Sync {
    fn policy_name(&self) -> String;

    fn next_delay(&self, previous: BatchOutcome) -> Duration;

    async fn pause(&self, previous: BatchOutcome) {
        let delay = self.next_delay(previous);
        if !delay.is_zero() {
            debug!("{} pacing: sleeping {:?}", self.policy_name(), delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// The same delay after every batch regardless of outcome.
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl PacingPolicy for FixedDelay {
    fn policy_name(&self) -> String {
        "fixed".to_string()
    }

    fn next_delay(&self, _previous: BatchOutcome) -> Duration {
        self.delay
    }
}

pub struct NoPacing;

impl PacingPolicy for NoPacing {
    fn policy_name(&self) -> String {
        "none".to_string()
    }

    fn next_delay(&self, _previous: BatchOutcome) -> Duration {
        Duration::ZERO
    }
}

/// Base delay after successes; after each failed batch the delay grows
/// exponentially and snaps back to the base on the next success.
pub struct BackoffPacing {
    base: Duration,
    backoff: Mutex<ExponentialBackoff<SystemClock>>,
}

impl BackoffPacing {
    pub fn new(base: Duration, max: Duration) -> Self {
        let backoff = ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            max_interval: max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        Self {
            base,
            backoff: Mutex::new(backoff),
        }
    }
}

impl PacingPolicy for BackoffPacing {
    fn policy_name(&self) -> String {
        "backoff".to_string()
    }

    fn next_delay(&self, previous: BatchOutcome) -> Duration {
        let mut backoff = match self.backoff.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match previous {
            BatchOutcome::Succeeded => {
                backoff.reset();
                self.base
            }
            BatchOutcome::Failed => backoff.next_backoff().unwrap_or(self.base),
        }
    }
}
