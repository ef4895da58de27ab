use std::time::Duration;

use anyhow::Result;
use rowdy_core::error::RowdyError;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// The bounded-retry envelope every registry HTTP step (existence probe, initiate,
/// fetch, PATCH, PUT) wraps itself in: retry transient failures forever with
/// exponential backoff, stop immediately on anything fatal.
///
/// `op` returns `Result<T, RowdyError>` so the envelope can distinguish a transient
/// outcome (keep retrying) from a fatal one (propagate now) from a plain success.
/// A non-`RowdyError` failure inside `op` (surfaced as `anyhow::Error` via `?`) is
/// always treated as fatal, matching "a non-HTTP error" in the retry policy.
pub async fn retry_transient<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RetryOutcome>>,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetryOutcome::Fatal(err)) => return Err(err),
            Err(RetryOutcome::Transient(err)) => {
                log::warn!("transient failure, retrying in {backoff:?}: {err}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// The two ways a retried step can fail: transiently (keep retrying) or fatally
/// (propagate immediately). Built from a `RowdyError` via `From`, or directly from
/// any other error via `RetryOutcome::fatal`.
pub enum RetryOutcome {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl RetryOutcome {
    pub fn fatal(err: impl Into<anyhow::Error>) -> RetryOutcome {
        RetryOutcome::Fatal(err.into())
    }

    pub fn from_rowdy_error(err: RowdyError) -> RetryOutcome {
        if err.is_retryable() {
            RetryOutcome::Transient(err.into())
        } else {
            RetryOutcome::Fatal(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = AtomicUsize::new(0);
        let result = retry_transient(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RetryOutcome::Transient(anyhow::anyhow!("not yet")))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_fatal() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_transient(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryOutcome::fatal(anyhow::anyhow!("nope"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
