//! Bounded polling shared by lock and slot acquisition.

use std::future::Future;

use larder_core::{LarderResult, RetryPolicy};

/// Outcome of a bounded polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polled<T> {
    Acquired(T),
    Exhausted { attempts: u32 },
}

/// Run `attempt` until it yields `Some`, sleeping `retry.interval` between
/// tries. Without a policy there is exactly one try. Errors end the loop.
pub(crate) async fn poll<T, F, Fut>(
    retry: Option<RetryPolicy>,
    mut attempt: F,
) -> LarderResult<Polled<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LarderResult<Option<T>>>,
{
    let attempts = retry.map(|r| r.attempts()).unwrap_or(1);

    for n in 1..=attempts {
        if let Some(value) = attempt().await? {
            return Ok(Polled::Acquired(value));
        }
        if n < attempts {
            if let Some(policy) = retry {
                tokio::time::sleep(policy.interval).await;
            }
        }
    }

    Ok(Polled::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{LarderError, StorageError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_without_policy() {
        let calls = AtomicU32::new(0);
        let outcome: Polled<()> = poll(None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { LarderResult::Ok(None) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, Polled::Exhausted { attempts: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(50), 5);
        let started = tokio::time::Instant::now();

        let outcome = poll(Some(policy), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { LarderResult::Ok((n == 3).then_some(n)) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, Polled::Acquired(3));
        // two sleeps between three attempts
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_times_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(10), 4);
        let outcome: Polled<()> = poll(Some(policy), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { LarderResult::Ok(None) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, Polled::Exhausted { attempts: 4 });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_stops_polling() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(10), 4);
        let result: LarderResult<Polled<()>> = poll(Some(policy), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LarderError::from(StorageError::LockPoisoned)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
