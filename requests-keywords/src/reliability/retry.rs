//! Exponential backoff retry for session requests.
//!
//! A session with `max_retries > 0` re-sends a request when the connection
//! fails, when an idempotent request times out, or when the server answers
//! with a status from the session's retry list.

use std::time::Duration;

use reqwest::{Method, header::RETRY_AFTER};

use crate::{
    error::{KeywordError, Result, TransportErrorKind},
    response::Response,
};

/// Statuses retried when the server also sends `Retry-After`.
const RETRY_AFTER_STATUSES: [u16; 3] = [413, 429, 503];

/// Configuration for retry behavior.
///
/// The delay before retry `n` (1-based) is `backoff_factor * 2^(n-1)`
/// seconds, capped at `max_backoff`. A `Retry-After` header on a retried
/// response replaces the computed delay.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use requests_keywords::reliability::RetryPolicy;
///
/// // Default policy: 3 retries, 0.1s backoff factor, idempotent methods only
/// let policy = RetryPolicy::default();
///
/// // Retry gateway errors as well
/// let gateway = RetryPolicy { status_forcelist: vec![502, 503, 504], ..RetryPolicy::default() };
/// assert_eq!(gateway.max_retries, 3);
/// assert_eq!(gateway.max_backoff, Duration::from_secs(120));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Base of the exponential backoff in seconds (default: 0.1).
    pub backoff_factor: f64,
    /// Upper bound for a single backoff sleep (default: 120s).
    pub max_backoff: Duration,
    /// Status codes that trigger a retry (default: none).
    pub status_forcelist: Vec<u16>,
    /// Methods for which timeouts and statuses are retried.
    pub allowed_methods: Vec<Method>,
    /// Honour `Retry-After` on retried responses (default: true).
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 0.1,
            max_backoff: Duration::from_secs(120),
            status_forcelist: Vec::new(),
            allowed_methods: default_allowed_methods(),
            respect_retry_after: true,
        }
    }
}

/// Idempotent methods retried by default.
#[must_use]
pub fn default_allowed_methods() -> Vec<Method> {
    vec![Method::HEAD, Method::GET, Method::PUT, Method::DELETE, Method::OPTIONS, Method::TRACE]
}

impl RetryPolicy {
    /// Creates a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy with custom retry count.
    ///
    /// # Examples
    ///
    /// ```
    /// use requests_keywords::reliability::RetryPolicy;
    ///
    /// let policy = RetryPolicy::with_max_retries(5);
    /// assert_eq!(policy.max_retries, 5);
    /// assert_eq!(policy.total_attempts(), 6);
    /// ```
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// Total number of attempts including the first one.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculates the sleep before retry number `retry` (1-based).
    fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.backoff_factor * 2f64.powi(exponent);
        if seconds.is_nan() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(seconds).map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Returns `true` if timeouts and statuses may be retried for `method`.
    #[must_use]
    pub fn is_method_retryable(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    /// Returns `true` if `response` should be retried.
    #[must_use]
    pub fn is_status_retryable(&self, method: &Method, response: &Response) -> bool {
        if !self.is_method_retryable(method) {
            return false;
        }
        let status = response.status();
        self.status_forcelist.contains(&status)
            || (self.respect_retry_after
                && RETRY_AFTER_STATUSES.contains(&status)
                && response.headers().contains_key(RETRY_AFTER))
    }

    fn sleep_for(&self, retry: u32, response: Option<&Response>) -> Duration {
        if self.respect_retry_after
            && let Some(wait) = response.and_then(retry_after)
        {
            return wait;
        }
        self.delay_for_retry(retry)
    }
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    response.header(RETRY_AFTER.as_str()).and_then(|value| value.trim().parse::<u64>().ok()).map(Duration::from_secs)
}

/// Determines if a transport error is retryable for `method`.
///
/// Connection failures are retried for every method since the request never
/// reached the server. Timeouts and body errors are retried only for methods
/// in the policy's allowlist.
///
/// # Examples
///
/// ```
/// use requests_keywords::{
///     KeywordError, TransportError, TransportErrorKind,
///     reliability::{RetryPolicy, is_retryable},
/// };
/// use reqwest::Method;
///
/// let policy = RetryPolicy::default();
/// let refused = KeywordError::from(TransportError::new(TransportErrorKind::Connect, "refused"));
/// assert!(is_retryable(&policy, &refused, &Method::POST));
///
/// let timeout = KeywordError::from(TransportError::new(TransportErrorKind::Timeout, "read"));
/// assert!(!is_retryable(&policy, &timeout, &Method::POST));
/// assert!(is_retryable(&policy, &timeout, &Method::GET));
/// ```
#[must_use]
pub fn is_retryable(policy: &RetryPolicy, error: &KeywordError, method: &Method) -> bool {
    match error.transport_kind() {
        Some(TransportErrorKind::Connect) => true,
        Some(TransportErrorKind::Timeout | TransportErrorKind::Body) => policy.is_method_retryable(method),
        Some(TransportErrorKind::Redirect | TransportErrorKind::Request) | None => false,
    }
}

/// Executes `operation` with exponential backoff retry.
///
/// The closure receives the 1-based attempt number. Without a policy the
/// operation runs exactly once.
///
/// # Errors
///
/// - the last transport error once retries are exhausted, or immediately
///   for non-retryable errors
/// - [`KeywordError::TooManyRetries`] when every attempt produced a retryable status
pub async fn retry_with_backoff<F, Fut>(
    policy: Option<&RetryPolicy>,
    method: &Method,
    url: &str,
    mut operation: F,
) -> Result<Response>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Response>>,
{
    let Some(policy) = policy.filter(|p| p.max_retries > 0) else {
        return operation(1).await;
    };
    let attempts = policy.total_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = operation(attempt).await;
        let can_retry = attempt < attempts;

        match outcome {
            Ok(response) if policy.is_status_retryable(method, &response) => {
                if !can_retry {
                    tracing::warn!(url, status = response.status(), attempts, "Retries exhausted");
                    return Err(KeywordError::TooManyRetries {
                        url: url.to_owned(),
                        status: response.status(),
                        attempts,
                    });
                }
                let delay = policy.sleep_for(attempt, Some(&response));
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    status = response.status(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retryable status, sleeping before retry"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(response) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Request succeeded after retry");
                }
                return Ok(response);
            }
            Err(error) if can_retry && is_retryable(policy, &error, method) => {
                let delay = policy.sleep_for(attempt, None);
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %error,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Request failed, sleeping before retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}
