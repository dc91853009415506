//! Process-wide token-bucket rate limiting.
//!
//! # Overview
//!
//! One [`RateLimiter`] is shared by every request a chain serves, across all
//! jobs. The bucket holds `capacity` tokens and is refilled to capacity once
//! per [`REFILL_INTERVAL`]. Callers that find the bucket empty sleep until the
//! next refill; tokens are never handed back.
//!
//! # Example
//!
//! ```
//! use novel_downloader_core::fetch::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(5);
//! for _ in 0..5 {
//!     limiter.acquire().await; // no wait within the first second
//! }
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use super::constants::REFILL_INTERVAL;
use super::{FetchError, FetchRequest, FetchResponse, Transport};

/// Token-bucket state.
#[derive(Debug)]
struct RateBucket {
    capacity: u32,
    tokens: u32,
    last_refill: Instant,
}

impl RateBucket {
    fn full(capacity: u32) -> Self {
        Self {
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Refills to capacity if at least one interval elapsed since the last refill.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed >= REFILL_INTERVAL {
            let periods = elapsed.as_nanos() / REFILL_INTERVAL.as_nanos();
            let periods = u32::try_from(periods).unwrap_or(u32::MAX);
            self.last_refill += REFILL_INTERVAL * periods;
            self.tokens = self.capacity;
        }
    }

    fn next_refill(&self) -> Instant {
        self.last_refill + REFILL_INTERVAL
    }
}

/// Shared token bucket. Wrap in `Arc` to share between stages and tests.
#[derive(Debug)]
pub struct RateLimiter {
    /// `None` when rate limiting is disabled.
    bucket: Option<Mutex<RateBucket>>,

    /// Total time callers spent waiting, in milliseconds.
    waited_ms: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter allowing `requests_per_second` requests per interval.
    ///
    /// A rate of 0 is treated as 1.
    #[must_use]
    #[instrument]
    pub fn new(requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1);
        debug!(capacity, "creating rate limiter");
        Self {
            bucket: Some(Mutex::new(RateBucket::full(capacity))),
            waited_ms: AtomicU64::new(0),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            bucket: None,
            waited_ms: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.bucket.is_none()
    }

    /// Total time callers have spent blocked in [`acquire`](Self::acquire).
    #[must_use]
    pub fn total_wait(&self) -> Duration {
        Duration::from_millis(self.waited_ms.load(Ordering::Relaxed))
    }

    /// Takes one token, sleeping until the next refill while the bucket is empty.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };
        let started = Instant::now();
        loop {
            let wake_at = {
                let mut state = bucket.lock().await;
                state.refill(Instant::now());
                if state.tokens > 0 {
                    state.tokens -= 1;
                    trace!(remaining = state.tokens, "token taken");
                    break;
                }
                state.next_refill()
            };
            tokio::time::sleep_until(wake_at).await;
        }

        let waited = started.elapsed();
        if !waited.is_zero() {
            let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
            self.waited_ms.fetch_add(waited_ms, Ordering::Relaxed);
            debug!(waited_ms, "rate limit delay applied");
        }
    }
}

/// Chain stage that takes a token before passing the request on.
#[derive(Debug)]
pub struct RateLimitStage {
    inner: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl Transport for RateLimitStage {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.ensure_active()?;
        match request.cancellation() {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => {
                        return Err(FetchError::cancelled(request.url().as_str()));
                    }
                    () = self.limiter.acquire() => {}
                }
            }
            None => self.limiter.acquire().await,
        }
        self.inner.execute(request).await
    }
}
