use std::time::Duration;

use serde::Deserialize;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

/// What the receive loop does when the broker refuses an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcceptFailurePolicy {
    /// Log the failure and end the run with an error.
    #[default]
    Terminate,
    /// Log the failure, drop the message and keep receiving.
    Continue,
    /// Re-attempt the acknowledgement with backoff, then terminate.
    Retry,
}

/// Exponential backoff used between forwarding (and accept) re-attempts.
///
/// The n-th delay is `factor * base^n` milliseconds, capped at
/// `max_delay_ms`. `max_attempts` bounds the number of re-attempts; zero
/// disables retrying.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base: u64,
    pub factor: u64,
    pub max_delay_ms: u64,
    pub max_attempts: usize,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: 2,
            factor: 100,
            max_delay_ms: 2_000,
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delays to wait before each re-attempt.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let with_jitter = self.jitter;
        ExponentialBackoff::from_millis(self.base.max(1))
            .factor(self.factor)
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .take(self.max_attempts)
            .map(move |d| if with_jitter { jitter(d) } else { d })
    }
}
