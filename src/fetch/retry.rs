//! Retry with exponential backoff for idempotent requests.
//!
//! # Overview
//!
//! Failures are classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - transport errors and 5xx responses
//! - [`FailureType::Permanent`] - everything else (4xx, cancellation, bad URL)
//!
//! [`RetryPolicy`] decides whether and when to try again:
//! `delay = min(base_delay * 2^(attempt-1), max_delay)`, plus optional jitter.
//! [`RetryStage`] applies the policy to GET, HEAD and OPTIONS requests only.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use novel_downloader_core::fetch::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transient, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_millis(500));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { .. } => unreachable!(),
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument, warn};

use super::{FetchError, FetchRequest, FetchResponse, Transport};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default cap on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on retry.
    Transient,
    /// Will not succeed on retry.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// Attempt number of the retry (the first retry is attempt 2).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Why no retry happens.
        reason: String,
    },
}

/// Backoff configuration.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `base_delay`: 500ms
/// - `max_delay`: 5000ms
/// - `jitter`: none
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_retries` counts retries, not the first attempt.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: Duration::ZERO,
        }
    }

    /// Default delays with a custom retry count.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Adds up to `jitter` of random delay to every backoff.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides what to do after attempt number `attempt` (1-indexed) failed.
    #[instrument(level = "trace", skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }
        if attempt > self.max_retries {
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            attempt: attempt + 1,
        }
    }

    /// Backoff before the retry that follows failed attempt `attempt`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_millis() as f64;
        let capped_ms = (base_ms * BACKOFF_MULTIPLIER.powi(exponent))
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.random_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn random_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Returns `true` for methods that are safe to repeat.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// Classifies a response status. Only 5xx is worth repeating.
#[must_use]
pub fn classify_status(status: StatusCode) -> FailureType {
    if status.is_server_error() {
        FailureType::Transient
    } else {
        FailureType::Permanent
    }
}

/// Classifies a fetch error. Only transport failures are worth repeating.
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    if error.is_transport() {
        FailureType::Transient
    } else {
        FailureType::Permanent
    }
}

/// Chain stage that re-sends idempotent requests on transient failure.
///
/// When retries run out the last outcome is returned as-is: the final
/// transport error, or the final 5xx response.
#[derive(Debug)]
pub struct RetryStage {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryStage {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Transport for RetryStage {
    #[instrument(skip(self, request), fields(url = %request.url()))]
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.ensure_active()?;
        if !is_idempotent(request.method()) {
            return self.inner.execute(request).await;
        }

        let mut attempt = 1;
        loop {
            let outcome = self.inner.execute(request.clone()).await;
            let failure = match &outcome {
                Ok(response) if response.status().is_success() => None,
                Ok(response) if response.challenge_unsupported() => Some(FailureType::Permanent),
                Ok(response) => Some(classify_status(response.status())),
                Err(error) => Some(classify_error(error)),
            };
            let Some(failure) = failure else {
                return outcome;
            };

            let delay = match self.policy.should_retry(failure, attempt) {
                RetryDecision::Retry { delay, .. } => delay,
                RetryDecision::DoNotRetry { reason } => {
                    if failure == FailureType::Transient {
                        warn!(attempt, reason = %reason, "giving up");
                    }
                    return outcome;
                }
            };

            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying after transient failure"
            );
            match request.cancellation() {
                Some(token) => {
                    tokio::select! {
                        () = token.cancelled() => {
                            return Err(FetchError::cancelled(request.url().as_str()));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::test_support::{ScriptedTransport, response};

    fn get(url: &str) -> FetchRequest {
        FetchRequest::parse_get(url).unwrap()
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_millis(5000));
        assert_eq!(policy.jitter, Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default().with_jitter(Duration::from_millis(100));
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_should_retry_exhausts_after_max_retries() {
        let policy = RetryPolicy::with_max_retries(2);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        match policy.should_retry(FailureType::Transient, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            other => panic!("expected DoNotRetry, got {other:?}"),
        }
    }

    #[test]
    fn test_should_retry_permanent_never_retries() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_is_idempotent() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::HEAD));
        assert!(is_idempotent(&Method::OPTIONS));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PUT));
    }

    #[test]
    fn test_classify_status_and_error() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            FailureType::Transient
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FailureType::Permanent);
        assert_eq!(
            classify_error(&FetchError::transport_message("u", "reset")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&FetchError::cancelled("u")),
            FailureType::Permanent
        );
    }

    // ==================== RetryStage Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_stage_post_500_returned_without_retry() {
        let inner = Arc::new(ScriptedTransport::fixed(500, "boom"));
        let stage = RetryStage::new(inner.clone(), RetryPolicy::default());
        let request = FetchRequest::new(Method::POST, url::Url::parse("http://h/p").unwrap());

        let response = stage.execute(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_get_5xx_retried_until_exhausted() {
        let inner = Arc::new(ScriptedTransport::fixed(503, "busy"));
        let stage = RetryStage::new(inner.clone(), RetryPolicy::default());

        let response = stage.execute(get("http://h/c/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(inner.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_get_4xx_not_retried() {
        let inner = Arc::new(ScriptedTransport::fixed(404, "missing"));
        let stage = RetryStage::new(inner.clone(), RetryPolicy::default());

        let response = stage.execute(get("http://h/c/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_transport_error_then_success() {
        let inner = Arc::new(ScriptedTransport::new(|request, index| {
            if index == 0 {
                Err(FetchError::transport_message(request.url().as_str(), "reset"))
            } else {
                Ok(response(200, request.url(), "ok"))
            }
        }));
        let stage = RetryStage::new(inner.clone(), RetryPolicy::default());

        let started = tokio::time::Instant::now();
        let response = stage.execute(get("http://h/c/1")).await.unwrap();
        assert_eq!(response.text(), "ok");
        assert_eq!(inner.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_exhausted_surfaces_last_transport_error() {
        let inner = Arc::new(ScriptedTransport::new(|request, index| {
            Err(FetchError::transport_message(
                request.url().as_str(),
                format!("failure {index}"),
            ))
        }));
        let stage = RetryStage::new(inner.clone(), RetryPolicy::with_max_retries(2));

        let error = stage.execute(get("http://h/c/1")).await.unwrap_err();
        assert_eq!(inner.calls(), 3);
        assert!(error.to_string().contains("failure 2"), "got: {error}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_cancellation_interrupts_backoff() {
        let inner = Arc::new(ScriptedTransport::fixed(503, "busy"));
        let stage = RetryStage::new(inner.clone(), RetryPolicy::default());
        let token = tokio_util::sync::CancellationToken::new();
        let request = get("http://h/c/1").with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let result = stage.execute(request).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(FetchError::Cancelled { .. })));
        assert_eq!(inner.calls(), 1);
    }
}
