//! Resilient HTTP fetching.
//!
//! # Overview
//!
//! Requests pass through an ordered chain of stages, each wrapping the next
//! behind the [`Transport`] trait:
//!
//! 1. [`DedupStage`] collapses identical in-flight requests
//! 2. [`RateLimitStage`] takes a token from the shared [`RateLimiter`]
//! 3. [`RetryStage`] retries idempotent requests with exponential backoff
//! 4. [`ChallengeStage`] clears anti-bot interstitials through a [`BrowserEngine`]
//! 5. [`CacheAnnotateStage`] marks which responses may be cached
//! 6. [`HttpTransport`] performs the request with reqwest
//!
//! [`ResilienceChain::builder`] wires them together.
//!
//! # Example
//!
//! ```no_run
//! use novel_downloader_core::fetch::{FetchRequest, ResilienceChain, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let chain = ResilienceChain::builder().requests_per_second(Some(2)).build()?;
//! let response = chain
//!     .execute(FetchRequest::parse_get("https://example.com/chapter-1")?)
//!     .await?;
//! println!("{} bytes", response.body().len());
//! # Ok(())
//! # }
//! ```

mod cache_control;
mod chain;
mod challenge;
mod constants;
mod cookies;
mod dedup;
mod error;
mod rate_limiter;
mod request;
mod retry;
mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache_control::{CacheAnnotateStage, annotate};
pub use chain::{ResilienceChain, ResilienceChainBuilder};
pub use challenge::{
    BrowserEngine, BrowserError, ChallengeRequest, ChallengeStage, Clearance, is_challenge,
};
pub use constants::{
    CACHE_STATUS_HEADER, CHALLENGE_NOTICE_HEADER, CLEARANCE_COOKIE, DEFAULT_CHALLENGE_TIMEOUT,
    DEFAULT_DEDUP_CLEANUP, DEFAULT_DEDUP_TTL, DEFAULT_REQUESTS_PER_SECOND,
};
pub use cookies::{
    CookieError, CookieLine, SessionCookies, load_cookie_file, parse_netscape_cookies,
};
pub use dedup::DedupStage;
pub use error::FetchError;
pub use rate_limiter::{RateLimitStage, RateLimiter};
pub use request::{FetchRequest, FetchResponse};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision,
    RetryPolicy, RetryStage, classify_error, classify_status, is_idempotent,
};
pub use transport::{HttpTransport, Transport, TransportConfig};
