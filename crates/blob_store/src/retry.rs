//! Retry/timeout executor layered over the transport's native retry.

use std::{
    cmp::min,
    future::Future,
    hash::{DefaultHasher, Hasher},
    time::Duration,
};

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{Span, error, warn};

use crate::{Operation, classify::Failure};

/// Configuration for retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of invocations of the operation, first try included.
    pub max_attempts: usize,
    /// Initial delay in milliseconds before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds between retries.
    pub max_delay_ms: u64,
    /// Maximum jitter in milliseconds to add to the delay.
    pub jitter_ms: u64,
    /// Bound on the whole attempt sequence, backoff sleeps included.
    pub deadline: Duration,
    /// Bound on a single attempt. A hung attempt is cut and retried as a
    /// timeout.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 250,
            max_delay_ms: 2000,
            jitter_ms: 100,
            deadline: Duration::from_secs(5),
            attempt_timeout: None,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, runs
/// out of attempts or hits the deadline.
///
/// Only timeouts are retried. Exhausted attempts and an expired deadline both
/// surface as a permanent failure wrapping the last observed error. On
/// deadline expiry the in-flight attempt is dropped, which aborts its request.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    span: &Span,
    op: Operation,
    mut operation: F,
) -> Result<T, Failure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_failure: Option<Failure> = None;

    let attempts = async {
        let mut attempt = 0;
        let mut delay = policy.initial_delay_ms;

        loop {
            attempt += 1;
            let result = match policy.attempt_timeout {
                Some(limit) => match timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(Failure::timeout(
                        anyhow::Error::new(elapsed)
                            .context(format!("attempt {attempt} exceeded {limit:?}")),
                    )),
                },
                None => operation().await,
            };

            let failure = match result {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                return Err(failure);
            }

            if attempt >= max_attempts {
                error!(
                    parent: span,
                    %op,
                    attempt,
                    error = %failure,
                    "blob store operation failed after using all attempts"
                );
                return Err(Failure::permanent(
                    failure
                        .source
                        .context(format!("giving up after {attempt} attempts")),
                ));
            }

            warn!(
                parent: span,
                %op,
                attempt,
                error = %failure,
                "retrying blob store operation after timeout"
            );
            last_failure = Some(failure);

            let jitter = generate_jitter(policy.jitter_ms);
            let delay_with_jitter = min(delay.saturating_add(jitter), policy.max_delay_ms);
            sleep(Duration::from_millis(delay_with_jitter)).await;
            delay = min(delay.saturating_mul(2), policy.max_delay_ms);
        }
    };

    let outcome = timeout(policy.deadline, attempts).await;
    match outcome {
        Ok(result) => result,
        Err(_) => {
            let source = match last_failure.take() {
                Some(failure) => failure
                    .source
                    .context(format!("deadline of {:?} exceeded", policy.deadline)),
                None => anyhow::anyhow!(
                    "deadline of {:?} exceeded before the first attempt completed",
                    policy.deadline
                ),
            };
            error!(
                parent: span,
                %op,
                error = %format!("{source:#}"),
                "blob store operation timed out"
            );
            Err(Failure::permanent(source))
        }
    }
}

fn generate_jitter(max_jitter: u64) -> u64 {
    let nanos = Utc::now().timestamp_subsec_nanos();

    let mut hasher = DefaultHasher::default();
    hasher.write_u32(nanos);
    hasher.finish() % (max_jitter + 1)
}
