//! Retry logic with capped exponential backoff for upstream HTTP calls.
//!
//! Only transport failures are retried; the caller inspects status codes.
//! Connection failures are retried for any method, since the request never
//! reached upstream. Other transport failures (timeouts, broken bodies) are
//! only retried for idempotent methods.

use reqwest::Method;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubles on each following one.
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub connect_retries: u32,
    pub other_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            connect_retries: 5,
            other_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self { connect_retries: 0, other_retries: 0, ..Self::default() }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt)).min(self.max_delay)
    }
}

fn is_idempotent(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS, Method::TRACE].contains(method)
}

/// Send an HTTP request, retrying transport failures according to `policy`.
///
/// The closure `f` builds and sends a fresh request on every call.
pub(crate) async fn retry_send<F, Fut>(
    policy: &RetryPolicy,
    method: &Method,
    f: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let (mut connect, mut other) = (0, 0);
    loop {
        let e = match f().await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        let budget = if e.is_connect() {
            connect += 1;
            policy.connect_retries >= connect
        } else if is_idempotent(method) {
            other += 1;
            policy.other_retries >= other
        } else {
            false
        };
        if !budget {
            return Err(e);
        }
        let attempt = connect + other - 1;
        let delay = policy.delay(attempt);
        tracing::warn!(attempt = attempt + 1, %method, "Upstream request failed, retrying in {delay:?}: {e}");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..RetryPolicy::default()
        }
    }

    #[rstest]
    #[case(0, 100)]
    #[case(1, 200)]
    #[case(3, 800)]
    #[case(4, 1600)]
    #[case(5, 2000)]
    #[case(40, 2000)]
    fn test_delay_is_capped(#[case] attempt: u32, #[case] millis: u64) {
        assert_eq!(RetryPolicy::default().delay(attempt), Duration::from_millis(millis));
    }

    #[rstest]
    #[case(Method::GET, 6)]
    #[case(Method::POST, 6)]
    #[tokio::test]
    async fn test_connection_failures_retry_for_any_method(#[case] method: Method, #[case] calls: u32) {
        let call_count = Arc::new(AtomicU32::new(0));
        let client = reqwest::Client::builder().timeout(Duration::from_millis(200)).build().unwrap();
        let result = retry_send(&fast(), &method, || {
            call_count.fetch_add(1, Ordering::SeqCst);
            // Guaranteed-closed port: connection refused.
            client.request(method.clone(), "http://127.0.0.1:1/").send()
        })
        .await;
        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_idempotent_methods() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::PUT));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }
}
