//! Failure classification and retry helpers
//!
//! Two kinds of retry live here. The publish strategy switch is driven by
//! [`is_size_limit_error`]; the orchestrator takes that back-edge at most once.
//! Transient RPC reads go through [`RetryManager`] with exponential backoff.

use aho_corasick::AhoCorasick;
use lazy_static::lazy_static;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Phrasings of "the transaction is too big" seen from nodes, SDKs and the CLI
pub const SIZE_LIMIT_PHRASES: &[&str] = &[
    "size limit exceeded",
    "sizelimitexceeded",
    "transaction size",
    "too large",
    "exceeds maximum",
    "max_tx_size",
    "max_pure_argument_size",
];

/// Transport failures worth retrying on read-only RPC calls
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "timed out",
    "timeout",
    "temporarily unavailable",
    "too many requests",
    "503",
    "502",
];

lazy_static! {
    static ref SIZE_LIMIT_MATCHER: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(SIZE_LIMIT_PHRASES)
        .expect("size limit phrases are valid patterns");
    static ref TRANSIENT_MATCHER: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(TRANSIENT_PATTERNS)
        .expect("transient patterns are valid patterns");
}

/// Case-insensitive substring match against [`SIZE_LIMIT_PHRASES`]
pub fn is_size_limit_error(message: &str) -> bool {
    SIZE_LIMIT_MATCHER.is_match(message)
}

/// Options for retry behavior
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

/// Retry manager for read-only network operations
///
/// # Examples
///
/// ```no_run
/// use sui_package_publisher::core::{RetryManager, RetryOptions};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let manager = RetryManager::new(RetryOptions::default());
///
///     let chain_id = manager.retry(|| async {
///         Ok::<_, anyhow::Error>("4c78adac".to_string())
///     }).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RetryManager {
    options: RetryOptions,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

impl RetryManager {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    /// Execute the given async operation, retrying transient failures
    pub async fn retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delay = self.options.initial_delay;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.is_retryable_error(&error) || attempt >= self.options.max_attempts {
                        return Err(error);
                    }

                    tracing::debug!(attempt, error = %error, "transient failure, backing off");
                    sleep(delay).await;

                    delay = Duration::from_secs_f64(
                        delay.as_secs_f64() * self.options.backoff_multiplier,
                    )
                    .min(self.options.max_delay);
                    attempt += 1;
                }
            }
        }
    }

    fn is_retryable_error<E: std::fmt::Display>(&self, error: &E) -> bool {
        TRANSIENT_MATCHER.is_match(&error.to_string())
    }
}
