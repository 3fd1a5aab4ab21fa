//! Dual token-bucket rate limiter gating every LLM and embedding call.
//!
//! Two independent budgets: requests per minute and tokens per minute.
//! Buckets refill continuously (fractional fill per elapsed slice), so a
//! steady stream of callers observes the full configured throughput.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;

struct Buckets {
    requests: f64,
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter for provider calls.
///
/// `acquire` blocks cooperatively until both buckets hold enough capacity,
/// then decrements both. Waiters queue on the internal lock; FIFO order is
/// not promised, but every waiter with a request within the bucket capacity
/// eventually proceeds. Callers that need a deadline wrap `acquire` in
/// `tokio::time::timeout`; dropping the future releases the lock.
pub struct RateLimiter {
    rpm: f64,
    tpm: f64,
    max_retries: u32,
    base_delay: Duration,
    state: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u64) -> Self {
        RateLimiter {
            rpm: requests_per_minute as f64,
            tpm: tokens_per_minute as f64,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            state: Mutex::new(Buckets {
                requests: requests_per_minute as f64,
                tokens: tokens_per_minute as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// Wait until `tokens` and `requests` worth of budget is available,
    /// then consume it.
    pub async fn acquire(&self, tokens: u64, requests: u32) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.requests = (state.requests + elapsed / 60.0 * self.rpm).min(self.rpm);
            state.tokens = (state.tokens + elapsed / 60.0 * self.tpm).min(self.tpm);
            state.last_refill = now;

            if state.requests >= requests as f64 && state.tokens >= tokens as f64 {
                state.requests -= requests as f64;
                state.tokens -= tokens as f64;
                return;
            }

            let wait_requests = (requests as f64 - state.requests) / (self.rpm / 60.0);
            let wait_tokens = (tokens as f64 - state.tokens) / (self.tpm / 60.0);
            let wait = wait_requests.max(wait_tokens).max(0.1);
            debug!(wait_secs = wait, "Rate limit reached, waiting");
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Run an operation, retrying transient failures with exponential
    /// backoff (`base_delay * 2^attempt`). Non-transient failures propagate
    /// immediately; retries are counted per logical call.
    pub async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_retries => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_when_empty() {
        let limiter = RateLimiter::new(60, 6000);

        // Drain the request bucket
        for _ in 0..60 {
            limiter.acquire(1, 1).await;
        }

        // The 61st acquire must wait roughly one refill interval
        let start = Instant::now();
        limiter.acquire(1, 1).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_budget_enforced() {
        // 10 requests/min but only 100 tokens/min
        let limiter = RateLimiter::new(10, 100);
        limiter.acquire(100, 1).await;

        let start = Instant::now();
        limiter.acquire(50, 1).await;
        // 50 tokens refill in 30s
        assert!(start.elapsed() >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_conformance() {
        // Over any 60s window at most R requests pass through.
        let limiter = RateLimiter::new(30, 1_000_000);
        let passed = AtomicU32::new(0);

        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(60) {
            limiter.acquire(10, 1).await;
            passed.fetch_add(1, Ordering::Relaxed);
        }

        // Initial burst of 30 plus one window of refill
        assert!(passed.load(Ordering::Relaxed) <= 61);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_then_success() {
        let limiter = RateLimiter::new(100, 10_000);
        let calls = AtomicU32::new(0);

        let result: Result<u32> = limiter
            .execute_with_retry(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::RateLimited("429".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_permanent_fails_fast() {
        let limiter = RateLimiter::new(100, 10_000);
        let calls = AtomicU32::new(0);

        let result: Result<()> = limiter
            .execute_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Provider("invalid api key".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_surfaces_error() {
        let limiter = RateLimiter::new(100, 10_000).with_retry_policy(3, Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result: Result<()> = limiter
            .execute_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Timeout("slow".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
