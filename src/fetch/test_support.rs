//! Scripted transport used by unit tests across the crate.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use url::Url;

use super::{FetchError, FetchRequest, FetchResponse, Transport};

type Handler = dyn Fn(&FetchRequest, usize) -> Result<FetchResponse, FetchError> + Send + Sync;

/// Answers each request with a closure of `(request, zero-based call index)`.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        handler: impl Fn(&FetchRequest, usize) -> Result<FetchResponse, FetchError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `status` and `body`.
    pub(crate) fn fixed(status: u16, body: &'static str) -> Self {
        Self::new(move |request, _| Ok(response(status, request.url(), body)))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs in the order they reached the transport.
    #[allow(clippy::unwrap_used)]
    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    #[allow(clippy::unwrap_used)]
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.ensure_active()?;
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.url().to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(&request, index)
    }
}

/// Builds a response with no headers.
#[allow(clippy::unwrap_used)]
pub(crate) fn response(status: u16, url: &Url, body: &'static str) -> FetchResponse {
    FetchResponse::new(
        StatusCode::from_u16(status).unwrap(),
        url.clone(),
        HeaderMap::new(),
        body,
    )
}
