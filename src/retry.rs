use std::future::Future;
use std::time::Duration;

/// Bounded retry for transient collaborator failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub tries: u32,
    pub delay: Duration,
    /// Delay multiplier applied after each failed attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            delay: Duration::from_secs(2),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.delay.as_secs_f64() * factor)
    }
}

/// Run `op` until it succeeds, fails permanently, or `policy.tries` is used up
///
/// # Arguments
/// * `label` - Operation name used in log lines
/// * `is_transient` - Decides whether an error is worth another attempt
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let tries = policy.tries.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < tries && is_transient(&e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} failed: {}, retrying in {:.1}s (attempt {}/{})",
                    label,
                    e,
                    delay.as_secs_f64(),
                    attempt,
                    tries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(tries: u32) -> RetryPolicy {
        RetryPolicy {
            tries,
            delay: Duration::ZERO,
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, String> = with_retry(
            &fast_policy(3),
            "flaky",
            |_| true,
            move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = with_retry(
            &fast_policy(5),
            "permanent",
            |_| false,
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("rejected".to_string())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_tries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = with_retry(
            &fast_policy(2),
            "down",
            |_| true,
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("timeout".to_string())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_grows_with_multiplier() {
        let policy = RetryPolicy {
            tries: 4,
            delay: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }
}
