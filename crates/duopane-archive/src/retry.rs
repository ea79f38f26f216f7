use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ArchiveError, Result};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry_count` (0 = first retry).
    pub fn delay(&self, retry_count: u32) -> Duration {
        retry_delay(retry_count, self.initial_delay, self.backoff_multiplier)
    }
}

/// Exponential backoff: `base * multiplier^retry_count`, saturating.
pub fn retry_delay(retry_count: u32, base: Duration, multiplier: f64) -> Duration {
    let factor = multiplier.max(1.0).powi(retry_count.min(i32::MAX as u32) as i32);
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Run `op` until it succeeds or fails with a non-retriable error.
///
/// Only I/O errors are retried, at most `max_retries` times. Cancellation is
/// checked before every attempt and interrupts the backoff sleep.
pub async fn with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ArchiveError::cancelled());
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retriable() => return Err(err),
            Err(err) => err,
        };

        if retries >= config.max_retries {
            let attempts = retries + 1;
            return Err(ArchiveError::new(
                err.code(),
                format!("{} (gave up after {attempts} attempts)", err.message()),
            )
            .with_detail(err.detail().to_string())
            .with_cause(err));
        }

        let delay = config.delay(retries);
        debug!(attempt = retries + 1, ?delay, error = %err, "retrying after transient failure");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(ArchiveError::cancelled()),
        }
        retries += 1;
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io;
    use std::time::Instant;

    fn io_error() -> ArchiveError {
        ArchiveError::new(ErrorCode::IoError, "read failed").with_cause(io::Error::other("eio"))
    }

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn delay_grows_by_multiplier() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_delay(0, base, 2.0), Duration::from_millis(100));
        assert_eq!(retry_delay(1, base, 2.0), Duration::from_millis(200));
        assert_eq!(retry_delay(3, base, 2.0), Duration::from_millis(800));
        assert_eq!(retry_delay(2, base, 1.0), base);
    }

    #[test]
    fn delay_saturates() {
        let delay = retry_delay(u32::MAX, Duration::from_secs(1), 10.0);
        assert_eq!(delay, Duration::MAX);
        assert_eq!(retry_delay(10, Duration::ZERO, 2.0), Duration::ZERO);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut calls = 0;
        let result = with_retry(&CancellationToken::new(), &fast(3), || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(io_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let mut calls = 0;
        let err = with_retry(&CancellationToken::new(), &fast(3), || {
            calls += 1;
            async { Err::<(), _>(ArchiveError::new(ErrorCode::Corrupted, "bad header")) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.code(), ErrorCode::Corrupted);
    }

    #[tokio::test]
    async fn exhaustion_keeps_the_last_code() {
        let mut calls = 0;
        let err = with_retry(&CancellationToken::new(), &fast(2), || {
            calls += 1;
            async { Err::<(), _>(io_error()) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 3);
        assert_eq!(err.code(), ErrorCode::IoError);
        assert!(err.message().contains("3 attempts"));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;
        let err = with_retry(&cancel, &fast(3), || {
            calls += 1;
            async { Ok(()) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 0);
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
    }

    #[tokio::test]
    async fn cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let config = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        };
        let started = Instant::now();
        let err = with_retry(&cancel, &config, || async { Err::<(), _>(io_error()) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn deserialize_from_toml() {
        let config: RetryConfig =
            toml::from_str("max_retries = 1\ninitial_delay_ms = 250").unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.backoff_multiplier, 2.0);
    }
}
