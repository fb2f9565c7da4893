use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Bounded retry with jitter for transient storage failures (spec.md §7:
/// "serialization conflict, deadlock → retry up to N=3 with jitter; on
/// final failure propagate as task-level failed"). `base_delay` is doubled
/// each attempt and jittered by up to 50%.
pub async fn retry_with_jitter<F, Fut, T, E>(
    max_attempts: u32,
    base_delay: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(err);
                }
                let delay = jittered_delay(base_delay, attempt);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn jittered_delay(base: Duration, attempt: u32) -> Duration {
    let backoff = base.saturating_mul(1 << attempt.min(8));
    let jitter_frac: f64 = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(backoff.as_secs_f64() * jitter_frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32, &str> = retry_with_jitter(3, Duration::from_millis(1), move || {
            let calls3 = calls2.clone();
            async move {
                calls3.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_propagates() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), &str> = retry_with_jitter(3, Duration::from_millis(1), move || {
            let calls3 = calls2.clone();
            async move {
                calls3.fetch_add(1, Ordering::SeqCst);
                Err("serialization conflict")
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32, &str> = retry_with_jitter(3, Duration::from_millis(1), move || {
            let calls3 = calls2.clone();
            async move {
                let n = calls3.fetch_add(1, Ordering::SeqCst);
                if n < 1 {
                    Err("deadlock")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }
}
