//! Retry and timeout helpers
//!
//! Used by the presence hub connect policy and the hub handshake. Token
//! provisioning deliberately does not retry: a failed fetch ends the
//! attempt in `LoginError` and the user retries by initializing again.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{VoiceError, VoiceResult};

/// Configuration for retry behavior
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use voice_session_core::recovery::RetryConfig;
///
/// let config = RetryConfig::default();
/// assert_eq!(config.max_attempts, 3);
/// assert_eq!(config.initial_delay, Duration::from_millis(500));
///
/// let none = RetryConfig::no_retry();
/// assert_eq!(none.max_attempts, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Randomize each delay by +/-10%
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays for interactive commands
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// A single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Delay before the next attempt, given the current one
    fn next_delay(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.backoff_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let jitter: f64 = rand::thread_rng().gen_range(-0.1..=0.1);
        let millis = delay.as_millis() as f64;
        Duration::from_millis((millis * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// Retry an operation with exponential backoff
///
/// Only errors for which [`VoiceError::is_recoverable`] is true are retried.
///
/// ```rust
/// use voice_session_core::recovery::{retry_with_backoff, RetryConfig};
/// use voice_session_core::VoiceError;
///
/// # tokio_test::block_on(async {
/// let mut calls = 0;
/// let result = retry_with_backoff("hub_connect", &RetryConfig::quick().without_jitter(), || {
///     calls += 1;
///     let attempt = calls;
///     async move {
///         if attempt < 2 {
///             Err(VoiceError::network("connection reset"))
///         } else {
///             Ok(attempt)
///         }
///     }
/// })
/// .await;
/// assert_eq!(result.unwrap(), 2);
/// # })
/// ```
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> VoiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VoiceResult<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt = attempt, "Operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < config.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );
                sleep(config.jittered(delay)).await;
                delay = config.next_delay(delay);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                } else {
                    error!(
                        operation = operation_name,
                        error = %e,
                        category = e.category(),
                        "Non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Run a future with a deadline
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> VoiceResult<T>
where
    F: Future<Output = VoiceResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(operation = operation_name, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
            Err(VoiceError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
