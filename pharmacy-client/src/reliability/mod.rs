//! Reliability patterns for backend communication.
//!
//! Provides exponential backoff for idempotent subscription reads.

mod retry;

pub use retry::{RetryPolicy, is_retryable, retry_with_backoff};
