use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }
}

/// Every attempt failed or was rejected.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: usize,
    pub last_error: Option<E>,
}

/// Run an operation until it yields an acceptable result, at most
/// `max_attempts` times.
#[derive(Debug, Clone)]
pub struct BoundedRetry {
    max_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl BoundedRetry {
    pub fn new(max_attempts: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms.max(initial_backoff_ms)),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// `operation` receives the 1-based attempt number. Errors and results
    /// refused by `accept` both count as failed attempts.
    pub async fn run<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        mut operation: F,
        accept: P,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&T) -> bool,
        E: Display,
    {
        let mut backoff = self.initial_backoff;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match operation(attempt).await {
                Ok(result) if accept(&result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Ok(_) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Operation returned an unacceptable result"
                    );
                }
                Err(e) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Operation failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.max_attempts && !backoff.is_zero() {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, self.max_backoff);
            }
        }

        warn!(
            operation = operation_name,
            attempts = self.max_attempts,
            "Operation exhausted its attempts"
        );
        Err(Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
