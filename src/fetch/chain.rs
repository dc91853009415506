//! Assembly of the resilience chain.
//!
//! A request travels outside-in through
//! dedup → rate limit → retry → challenge bypass → cache annotation → transport.
//! The rate limiter and the in-flight table live in the chain instance, so
//! every job that shares a chain shares them too.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::cache_control::CacheAnnotateStage;
use super::challenge::{BrowserEngine, ChallengeStage};
use super::constants::{
    DEFAULT_CHALLENGE_TIMEOUT, DEFAULT_DEDUP_CLEANUP, DEFAULT_DEDUP_TTL,
    DEFAULT_REQUESTS_PER_SECOND,
};
use super::cookies::SessionCookies;
use super::dedup::DedupStage;
use super::rate_limiter::{RateLimitStage, RateLimiter};
use super::retry::{RetryPolicy, RetryStage};
use super::transport::{HttpTransport, TransportConfig};
use super::{FetchError, FetchRequest, FetchResponse, Transport};

/// The assembled chain. Share it behind an `Arc`.
#[derive(Debug)]
pub struct ResilienceChain {
    head: Arc<dyn Transport>,
    cookies: Arc<SessionCookies>,
    limiter: Arc<RateLimiter>,
}

impl ResilienceChain {
    #[must_use]
    pub fn builder() -> ResilienceChainBuilder {
        ResilienceChainBuilder::default()
    }

    /// Cookie store used by the transport and the challenge stage.
    #[must_use]
    pub fn cookies(&self) -> &Arc<SessionCookies> {
        &self.cookies
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl Transport for ResilienceChain {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.head.execute(request).await
    }
}

/// Builder for [`ResilienceChain`].
#[derive(Debug)]
pub struct ResilienceChainBuilder {
    transport: Option<Arc<dyn Transport>>,
    transport_config: TransportConfig,
    cookies: Option<Arc<SessionCookies>>,
    engine: Option<Arc<dyn BrowserEngine>>,
    requests_per_second: Option<u32>,
    retry: RetryPolicy,
    dedup_ttl: Duration,
    dedup_cleanup: Duration,
    challenge_timeout: Duration,
}

impl Default for ResilienceChainBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            transport_config: TransportConfig::default(),
            cookies: None,
            engine: None,
            requests_per_second: Some(DEFAULT_REQUESTS_PER_SECOND),
            retry: RetryPolicy::default(),
            dedup_ttl: DEFAULT_DEDUP_TTL,
            dedup_cleanup: DEFAULT_DEDUP_CLEANUP,
            challenge_timeout: DEFAULT_CHALLENGE_TIMEOUT,
        }
    }
}

impl ResilienceChainBuilder {
    /// Replaces the reqwest transport, e.g. with a test double.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Settings for the default reqwest transport. Ignored when [`transport`](Self::transport) is set.
    #[must_use]
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    #[must_use]
    pub fn cookies(mut self, cookies: Arc<SessionCookies>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    #[must_use]
    pub fn browser_engine(mut self, engine: Arc<dyn BrowserEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Bucket capacity per second. `None` disables rate limiting.
    #[must_use]
    pub fn requests_per_second(mut self, rate: Option<u32>) -> Self {
        self.requests_per_second = rate;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    #[must_use]
    pub fn dedup_timing(mut self, ttl: Duration, cleanup_delay: Duration) -> Self {
        self.dedup_ttl = ttl;
        self.dedup_cleanup = cleanup_delay;
        self
    }

    #[must_use]
    pub fn challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }

    /// Builds the chain.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error when the default transport cannot be created.
    #[instrument(skip(self))]
    pub fn build(self) -> Result<ResilienceChain, reqwest::Error> {
        let cookies = self.cookies.unwrap_or_default();
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let config = TransportConfig {
                    cookies: Some(Arc::clone(&cookies)),
                    ..self.transport_config
                };
                Arc::new(HttpTransport::new(&config)?)
            }
        };
        let limiter = Arc::new(match self.requests_per_second {
            Some(rate) => RateLimiter::new(rate),
            None => RateLimiter::disabled(),
        });

        let cache: Arc<dyn Transport> = Arc::new(CacheAnnotateStage::new(transport));
        let challenge: Arc<dyn Transport> = Arc::new(
            ChallengeStage::new(cache, self.engine, Arc::clone(&cookies))
                .with_timeout(self.challenge_timeout),
        );
        let retry: Arc<dyn Transport> = Arc::new(RetryStage::new(challenge, self.retry));
        let rate: Arc<dyn Transport> =
            Arc::new(RateLimitStage::new(retry, Arc::clone(&limiter)));
        let head: Arc<dyn Transport> = Arc::new(DedupStage::with_timing(
            rate,
            self.dedup_ttl,
            self.dedup_cleanup,
        ));

        debug!("resilience chain assembled");
        Ok(ResilienceChain {
            head,
            cookies,
            limiter,
        })
    }
}
