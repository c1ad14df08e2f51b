use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per task, the first send included.
    pub max_attempts: u32,
    /// Pause between two attempts of the same task.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Stateless retry decisions; attempt counters live on the task being retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self, RetryError> {
        if config.max_attempts == 0 {
            return Err(RetryError::InvalidConfig(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn should_give_up(&self, attempts_made: u32) -> bool {
        attempts_made >= self.config.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.config.delay
    }
}
