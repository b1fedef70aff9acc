//! Bounded fixed-delay retry for eventually consistent post-create steps.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use backon::{ConstantBuilder, Retryable};
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::ApiError;

/// Why a bounded retry gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub last: ApiError,
}

/// Run `step` until it succeeds or `policy.max_attempts` attempts have been
/// made, waiting `policy.delay()` between attempts.
///
/// Every [`ApiError`] is retried: right after a create the new identifier may
/// simply not be visible yet. A policy with zero attempts still runs once.
/// Returns the number of attempts taken on success.
pub async fn retry_bounded<F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut step: F,
) -> Result<u32, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let attempts = AtomicU32::new(0);

    let result = (|| {
        attempts.fetch_add(1, Ordering::SeqCst);
        step()
    })
    .retry(
        ConstantBuilder::default()
            .with_delay(policy.delay())
            .with_max_times((max_attempts - 1) as usize),
    )
    .sleep(tokio::time::sleep)
    .notify(|e: &ApiError, dur| {
        warn!(
            step = what,
            attempt = attempts.load(Ordering::SeqCst),
            max_attempts,
            delay = ?dur,
            error = %e,
            "Post-create step failed, retrying..."
        );
    })
    .await;

    let attempts = attempts.load(Ordering::SeqCst);
    result
        .map(|()| attempts)
        .map_err(|last| Exhausted { attempts, last })
}
