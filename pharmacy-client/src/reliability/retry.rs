//! Exponential backoff retry for idempotent reads.
//!
//! Subscription lookups (current, history, plans) are retried when the
//! failure is transient. Mutations and authentication calls are never retried
//! here: the session manager owns the single 401 retry, and a repeated
//! mutation could apply twice on the backend.

use std::time::Duration;

use crate::error::ClientError;

/// Configuration for retry behavior.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use pharmacy_client::reliability::RetryPolicy;
///
/// // Default policy: 3 attempts, 100ms initial delay, 5s max delay
/// let policy = RetryPolicy::default();
///
/// let patient = RetryPolicy {
///     max_attempts: 5,
///     initial_delay: Duration::from_millis(250),
///     max_delay: Duration::from_secs(10),
///     backoff_multiplier: 2.0,
/// };
/// assert!(patient.max_attempts > policy.max_attempts);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one (default: 3)
    pub max_attempts: u32,
    /// Initial delay between attempts (default: 100ms)
    pub initial_delay: Duration,
    /// Maximum delay between attempts (default: 5s)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom maximum attempts.
    ///
    /// # Examples
    ///
    /// ```
    /// use pharmacy_client::reliability::RetryPolicy;
    ///
    /// let policy = RetryPolicy::with_max_attempts(5);
    /// assert_eq!(policy.max_attempts, 5);
    /// ```
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::with_max_attempts(1)
    }

    /// Calculates delay after a failed attempt.
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(
            clippy::cast_precision_loss,
            reason = "acceptable for duration calculations"
        )]
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis();
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "delay_ms is positive and compared against the cap before conversion"
        )]
        let delay = if !delay_ms.is_finite() || delay_ms >= max_ms as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        };
        delay.min(self.max_delay)
    }
}

/// Executes `operation` with exponential backoff.
///
/// Retries up to `max_attempts` times while `should_retry` accepts the error.
/// The first non-retryable error is returned immediately.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicU32, Ordering},
/// };
///
/// use pharmacy_client::reliability::{RetryPolicy, retry_with_backoff};
///
/// # async fn example() -> Result<String, String> {
/// let policy = RetryPolicy::default();
/// let attempt = Arc::new(AtomicU32::new(0));
///
/// let result = retry_with_backoff(
///     &policy,
///     |_: &String| true,
///     || {
///         let attempt = Arc::clone(&attempt);
///         async move {
///             if attempt.fetch_add(1, Ordering::Relaxed) < 2 {
///                 Err("temporary failure".to_string())
///             } else {
///                 Ok("success".to_string())
///             }
///         }
///     },
/// )
/// .await?;
///
/// assert_eq!(result, "success");
/// # Ok(result)
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error encountered if all attempts fail, or the first
/// error `should_retry` rejects.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = should_retry(&error);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    retryable,
                    error = %error,
                    "Operation failed"
                );

                if !retryable || attempt + 1 >= max_attempts {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(delay_ms = delay.as_millis(), "Sleeping before retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Determines if an error is transient.
///
/// Returns `true` for timeouts, connection failures and 5xx responses, the
/// cases where the same request may succeed later. Everything that depends on
/// credentials, permissions, or input is permanent.
///
/// # Examples
///
/// ```
/// use pharmacy_client::{ClientError, reliability::is_retryable};
///
/// assert!(!is_retryable(&ClientError::InvalidCredentials));
/// assert!(is_retryable(&ClientError::BackendError { status: 503, message: String::new() }));
/// ```
#[must_use]
pub fn is_retryable(error: &ClientError) -> bool {
    match error {
        ClientError::HttpError(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        ClientError::TransportError(_) => true,
        ClientError::BackendError { status, .. } => *status >= 500,
        ClientError::InvalidCredentials
        | ClientError::NotAuthenticated
        | ClientError::Unauthorized
        | ClientError::SessionExpired
        | ClientError::AccessDenied(_)
        | ClientError::NotFound(_)
        | ClientError::TrialAlreadyUsed
        | ClientError::OperationInProgress(_)
        | ClientError::RefetchFailed(_)
        | ClientError::BadRequest(_)
        | ClientError::InvalidResponse(_)
        | ClientError::InvalidToken(_)
        | ClientError::InvalidPharmacyId(_)
        | ClientError::InvalidPlanId(_)
        | ClientError::InvalidSubscriptionId(_)
        | ClientError::InvalidInput(_)
        | ClientError::StorageError(_)
        | ClientError::ConfigError(_) => false,
    }
}

#[cfg(test)]
#[allow(
    clippy::str_to_string,
    clippy::float_cmp,
    reason = "test code uses these patterns for readability"
)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_policy_none() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_transient_failures() {
        let policy = RetryPolicy::with_max_attempts(3);
        let call_count = Arc::new(Mutex::new(0));

        let count_clone = Arc::clone(&call_count);
        let result = retry_with_backoff(&policy, is_retryable, || {
            let count = Arc::clone(&count_clone);
            async move {
                let mut c = count.lock().unwrap();
                *c += 1;
                let current = *c;
                drop(c);

                if current < 3 {
                    Err(ClientError::TransportError("connection reset".to_string()))
                } else {
                    Ok::<i32, ClientError>(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*call_count.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);
        let call_count = Arc::new(Mutex::new(0));

        let count_clone = Arc::clone(&call_count);
        let result = retry_with_backoff(&policy, is_retryable, || {
            let count = Arc::clone(&count_clone);
            async move {
                *count.lock().unwrap() += 1;
                Err::<i32, ClientError>(ClientError::BackendError {
                    status: 502,
                    message: "bad gateway".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::BackendError { status: 502, .. })));
        assert_eq!(*call_count.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let policy = RetryPolicy::with_max_attempts(5);
        let call_count = Arc::new(Mutex::new(0));

        let count_clone = Arc::clone(&call_count);
        let result = retry_with_backoff(&policy, is_retryable, || {
            let count = Arc::clone(&count_clone);
            async move {
                *count.lock().unwrap() += 1;
                Err::<i32, ClientError>(ClientError::AccessDenied("forbidden".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::AccessDenied(_))));
        assert_eq!(*call_count.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        };

        let start = tokio::time::Instant::now();
        let _result = retry_with_backoff(
            &policy,
            |_: &ClientError| true,
            || async { Err::<i32, ClientError>(ClientError::TransportError("down".to_string())) },
        )
        .await;

        // 10ms + 20ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::with_max_attempts(0);
        let result =
            retry_with_backoff(&policy, is_retryable, || async { Ok::<i32, ClientError>(7) })
                .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_is_retryable_classification() {
        assert!(is_retryable(&ClientError::TransportError("reset".to_string())));
        assert!(is_retryable(&ClientError::BackendError {
            status: 500,
            message: String::new()
        }));
        assert!(!is_retryable(&ClientError::BackendError {
            status: 409,
            message: String::new()
        }));
        assert!(!is_retryable(&ClientError::SessionExpired));
        assert!(!is_retryable(&ClientError::TrialAlreadyUsed));
        assert!(!is_retryable(&ClientError::OperationInProgress("ph-1".to_string())));
        assert!(!is_retryable(&ClientError::NotFound("plan".to_string())));
    }
}
