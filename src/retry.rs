//! Backoff for transient Drive and storage failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How often, and how far apart, a task is re-attempted after a transient error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Give up after the first failure.
    #[default]
    None,

    /// Same pause before every retry.
    Fixed { max_retries: u32, delay: Duration },

    /// Pause doubles on every retry, capped at `max_delay`.
    Exponential {
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// Exponential backoff starting at 500ms, capped at 30 seconds.
    pub fn exponential(max_retries: u32) -> Self {
        Self::Exponential {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// Pause before retry number `retry` (1-indexed), or `None` when retries are used up.
    pub fn delay_for_retry(&self, retry: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_retries, delay } => (retry <= *max_retries).then_some(*delay),
            Self::Exponential {
                max_retries,
                initial_delay,
                max_delay,
            } => {
                if retry > *max_retries {
                    return None;
                }
                let multiplier = 2u64.saturating_pow(retry.saturating_sub(1));
                let delay_ms = (initial_delay.as_millis() as u64).saturating_mul(multiplier);
                Some(Duration::from_millis(delay_ms.min(max_delay.as_millis() as u64)))
            }
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. } => *max_retries,
            Self::Exponential { max_retries, .. } => *max_retries,
        }
    }
}

/// Errors that may succeed when the same call is repeated.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// Returns the final result together with the number of attempts made.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> (Result<T, E>, u32)
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return (Ok(value), attempts),
            Err(err) if err.is_transient() => match policy.delay_for_retry(attempts) {
                Some(delay) => {
                    warn!(
                        label,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return (Err(err), attempts),
            },
            Err(err) => return (Err(err), attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky({})", self.0)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_none_policy() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.delay_for_retry(1), None);
        assert_eq!(policy.max_retries(), 0);
    }

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(2, Duration::from_secs(5));
        assert_eq!(policy.delay_for_retry(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for_retry(2), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for_retry(3), None);
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = RetryPolicy::Exponential {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for_retry(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_retry(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for_retry(7), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for_retry(11), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(10));
        let (result, attempts) = with_retry(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err::<(), _>(Flaky(true))
                } else {
                    Err(Flaky(false))
                }
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_policy() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));
        let (result, attempts) =
            with_retry(&policy, "test", || async { Err::<(), _>(Flaky(true)) }).await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }
}
