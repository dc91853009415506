//! Defaults for the resilience chain (timeouts, dedup, rate limiting, challenge handling).

use std::time::Duration;

/// HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Whole-request timeout, including reading the body.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// How long an in-flight request may be joined by identical callers.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(5);

/// Delay before a resolved in-flight entry is evicted.
pub const DEFAULT_DEDUP_CLEANUP: Duration = Duration::from_secs(1);

/// Default token-bucket capacity (requests per second).
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

/// Bucket refill period.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Hard limit on waiting for a browser engine to clear a challenge.
pub const DEFAULT_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(12);

/// Cookie that proves a challenge was solved.
pub const CLEARANCE_COOKIE: &str = "cf_clearance";

/// `Server` header values that identify the challenge interstitial.
pub const CHALLENGE_SERVER_NAMES: [&str; 2] = ["cloudflare-nginx", "cloudflare"];

/// Header added when a challenge was seen but no browser engine is available.
pub const CHALLENGE_NOTICE_HEADER: &str = "x-challenge-bypass";

/// Header carrying the cache annotation.
pub const CACHE_STATUS_HEADER: &str = "x-cache";
