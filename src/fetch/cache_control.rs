//! Cache eligibility annotation.
//!
//! Only `200 OK` may be cached downstream. Every other status is stamped with
//! explicit no-store directives so a cache in front of the reader never keeps
//! an error page or a challenge interstitial.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, HeaderValue, PRAGMA};

use super::constants::CACHE_STATUS_HEADER;
use super::{FetchError, FetchRequest, FetchResponse, Transport};

const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Innermost chain stage: annotates responses as they come off the wire.
#[derive(Debug)]
pub struct CacheAnnotateStage {
    inner: Arc<dyn Transport>,
}

impl CacheAnnotateStage {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }
}

/// Applies the cache annotation to `response` in place.
pub fn annotate(response: &mut FetchResponse) {
    let ok = response.status() == StatusCode::OK;
    let headers = response.headers_mut();
    if ok {
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
        return;
    }
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("NO-CACHE"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
}

#[async_trait]
impl Transport for CacheAnnotateStage {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.ensure_active()?;
        let mut response = self.inner.execute(request).await?;
        annotate(&mut response);
        Ok(response)
    }
}
