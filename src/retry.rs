//! Retry logic with exponential backoff
//!
//! Used for per-subscriber deletions when `cleanup.delete_retry.max_attempts` is non-zero.
//! Delays go through the injected [`Clock`], so tests observe them without waiting.
//!
//! # Example
//!
//! ```no_run
//! use onesignal_cleaner::clock::SystemClock;
//! use onesignal_cleaner::config::RetryConfig;
//! use onesignal_cleaner::retry::{IsRetryable, with_retry};
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, &SystemClock, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::error::{Error, RegistryError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection refused, timeouts, throttling, 5xx) return `true`.
/// Everything the registry answered deliberately returns `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_transient(),
            Error::Registry(RegistryError::DeletionFailed { status, .. })
            | Error::Registry(RegistryError::ExportRequestFailed { status, .. }) => {
                is_transient_status(*status)
            }
            Error::Registry(RegistryError::MalformedResponse { .. }) => false,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Context { source, .. } => source.is_retryable(),
            Error::Config { .. }
            | Error::Download(_)
            | Error::Decode(_)
            | Error::ReadinessTimeoutExceeded { .. }
            | Error::Cancelled
            | Error::DeletionsFailed { .. }
            | Error::WorkerFailed(_) => false,
        }
    }
}

/// 429 and 5xx
fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation runs once, plus up to `config.max_attempts` retries while it fails with a
/// retryable error. Returns the successful result or the last error.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    clock: &dyn Clock,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                clock.sleep(wait).await;

                let next_secs = delay.as_secs_f64() * config.backoff_multiplier;
                delay = Duration::try_from_secs_f64(next_secs)
                    .unwrap_or(config.max_delay)
                    .min(config.max_delay);
            }
            Err(e) => {
                // The caller logs the final failure with its own context
                if e.is_retryable() && attempt > 0 {
                    tracing::debug!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Jitter is uniformly distributed between 0% and 100% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TransportError;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    async fn always_failing(
        config: &RetryConfig,
        clock: &ManualClock,
        error: fn() -> TestError,
    ) -> (Result<i32, TestError>, u32) {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let result = with_retry(config, clock, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(error())
            }
        })
        .await;
        (result, counter.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn success_does_not_retry() {
        let clock = clock();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config(3), &clock, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn transient_then_success() {
        let clock = clock();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config(3), &clock, || {
            let counter = counter_clone.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            [Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let clock = clock();
        let (result, calls) = always_failing(&config(2), &clock, || TestError::Transient).await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls, 3, "initial attempt plus two retries");
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let clock = clock();
        let (result, calls) = always_failing(&config(5), &clock, || TestError::Permanent).await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn zero_max_attempts_runs_once() {
        let clock = clock();
        let (result, calls) = always_failing(&config(0), &clock, || TestError::Transient).await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn backoff_is_exponential_and_capped() {
        let clock = clock();
        let _ = always_failing(&config(5), &clock, || TestError::Transient).await;

        let secs: Vec<u64> = clock.sleeps().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, [1, 2, 4, 5, 5]);
    }

    #[tokio::test]
    async fn jittered_delay_stays_within_bounds() {
        let clock = clock();
        let config = RetryConfig {
            jitter: true,
            ..config(1)
        };
        let _ = always_failing(&config, &clock, || TestError::Transient).await;

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 1);
        assert!(sleeps[0] >= Duration::from_secs(1));
        assert!(sleeps[0] <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unusable_multiplier_falls_back_to_max_delay() {
        let clock = clock();
        for multiplier in [-1.0, f64::NAN, f64::MAX] {
            let config = RetryConfig {
                backoff_multiplier: multiplier,
                ..config(2)
            };
            let (result, calls) = always_failing(&config, &clock, || TestError::Transient).await;
            assert!(result.is_err());
            assert_eq!(calls, 3, "multiplier {multiplier}");
        }

        let secs: Vec<u64> = clock.sleeps().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, [1, 5, 1, 5, 1, 5]);
    }

    #[test]
    fn add_jitter_on_huge_delay_does_not_overflow() {
        assert_eq!(add_jitter(Duration::MAX).as_secs(), u64::MAX);
    }

    #[test]
    fn add_jitter_on_zero_delay_returns_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn registry_status_classification() {
        let deletion = |status| {
            Error::Registry(RegistryError::DeletionFailed {
                id: "a".into(),
                status,
                body: String::new(),
            })
        };
        assert!(deletion(429).is_retryable());
        assert!(deletion(503).is_retryable());
        assert!(!deletion(200).is_retryable(), "success: false is deliberate");
        assert!(!deletion(400).is_retryable());
        assert!(!deletion(404).is_retryable());
    }

    #[test]
    fn transport_and_io_classification() {
        assert!(Error::Transport(TransportError::Simulated("reset".into())).is_retryable());
        assert!(!Error::Transport(TransportError::Body("eof".into())).is_retryable());
        assert!(
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset"
            ))
            .is_retryable()
        );
        assert!(
            !Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "denied"
            ))
            .is_retryable()
        );
    }

    #[test]
    fn context_defers_to_source() {
        let wrapped = Error::Context {
            context: "deleting".into(),
            source: Box::new(Error::Transport(TransportError::Simulated("x".into()))),
        };
        assert!(wrapped.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(
            !Error::Config {
                message: "bad".into(),
                key: None
            }
            .is_retryable()
        );
    }
}
