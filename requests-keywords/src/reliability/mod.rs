//! Retry handling for session requests.
//!
//! Implements the per-session retry adapter: bounded attempts, exponential
//! backoff, status and method allowlists.

mod retry;

pub use retry::{RetryPolicy, default_allowed_methods, is_retryable, retry_with_backoff};
