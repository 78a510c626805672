use crate::config::DispatchConfig;
use crate::error::SinkholeError;
use std::time::Duration;
use tracing::{error, info, warn};

/// Recovery action to take after a failed dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry the lifecycle operation after a delay
    RetryAfterDelay(Duration),
    /// Stop retrying and surface the failure to observers
    GiveUp,
}

/// Retry strategy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of automatic retries after the first attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_backoff: true,
        }
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_retries: config.max_retry_attempts,
            base_delay: config.retry_backoff_base(),
            max_delay: config.retry_backoff_max(),
            exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }

        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Retry bookkeeping for one coalesced request.
pub struct RecoveryManager {
    policy: RetryPolicy,
    retries: u32,
}

impl RecoveryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    /// Determine recovery action for a failed attempt
    pub fn handle_error(&mut self, error: &SinkholeError) -> RecoveryAction {
        if !error.is_retryable() {
            warn!("Non-retryable dispatch error: {}", error);
            return RecoveryAction::GiveUp;
        }

        if self.retries >= self.policy.max_retries {
            error!(
                "Maximum retries ({}) exhausted: {}",
                self.policy.max_retries, error
            );
            return RecoveryAction::GiveUp;
        }

        let delay = self.policy.delay_for(self.retries);
        self.retries += 1;

        info!(
            "Scheduling retry {}/{} in {:?}: {}",
            self.retries, self.policy.max_retries, delay, error
        );

        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Retries consumed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn has_exhausted_retries(&self) -> bool {
        self.retries >= self.policy.max_retries
    }
}
