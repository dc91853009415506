//! Anti-bot challenge detection and bypass.
//!
//! # Overview
//!
//! A challenge interstitial is a `503` whose `Server` header names the
//! challenge provider. [`ChallengeStage`] reacts to it by dropping the stale
//! clearance cookie, handing the URL to a [`BrowserEngine`] that renders the
//! page until a fresh clearance cookie appears, installing the cookies it
//! returns into the shared [`SessionCookies`], and re-issuing the original
//! request once.
//!
//! No engine ships with the crate. Without one the challenge response is passed
//! back unchanged apart from an `x-challenge-bypass: unavailable` header.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderValue, SERVER, USER_AGENT};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use super::constants::{
    CHALLENGE_NOTICE_HEADER, CHALLENGE_SERVER_NAMES, CLEARANCE_COOKIE, DEFAULT_CHALLENGE_TIMEOUT,
};
use super::cookies::SessionCookies;
use super::{FetchError, FetchRequest, FetchResponse, Transport};

/// What the browser engine is asked to render.
#[derive(Debug, Clone)]
pub struct ChallengeRequest {
    /// URL that served the challenge.
    pub url: Url,
    /// User-Agent of the original request, so the clearance matches it.
    pub user_agent: Option<String>,
    /// Clearance value held before the bypass started; the engine must produce a different one.
    pub previous_clearance: Option<String>,
}

/// Cookies captured once the challenge page settled.
#[derive(Clone, Default)]
pub struct Clearance {
    /// `(name, value)` pairs for the challenge host.
    pub cookies: Vec<(String, String)>,
}

impl Clearance {
    /// Value of the clearance cookie, if the engine captured one.
    #[must_use]
    pub fn clearance_value(&self) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(name, _)| name == CLEARANCE_COOKIE)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for Clearance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.cookies.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Clearance").field("cookies", &names).finish()
    }
}

/// Terminal failures reported by a browser engine.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    /// The page failed to load.
    #[error("page failed to load: {0}")]
    LoadFailed(String),

    /// The engine could not be started.
    #[error("browser engine unavailable: {0}")]
    Unavailable(String),
}

/// Renders a challenge page until the clearance cookie is set.
#[async_trait]
pub trait BrowserEngine: Send + Sync + fmt::Debug {
    /// Solves the challenge. Implementations should return as soon as a new
    /// clearance cookie exists or the page reports a terminal error.
    async fn solve(&self, request: ChallengeRequest) -> Result<Clearance, BrowserError>;
}

/// Returns `true` for the challenge interstitial signature.
#[must_use]
pub fn is_challenge(response: &FetchResponse) -> bool {
    response.status() == StatusCode::SERVICE_UNAVAILABLE
        && response
            .headers()
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|server| {
                let server = server.trim().to_ascii_lowercase();
                CHALLENGE_SERVER_NAMES.contains(&server.as_str())
            })
}

/// Chain stage that clears challenges through a [`BrowserEngine`].
#[derive(Debug)]
pub struct ChallengeStage {
    inner: Arc<dyn Transport>,
    engine: Option<Arc<dyn BrowserEngine>>,
    cookies: Arc<SessionCookies>,
    timeout: Duration,
}

impl ChallengeStage {
    /// Creates the stage with the default 12s bypass timeout.
    #[must_use]
    pub fn new(
        inner: Arc<dyn Transport>,
        engine: Option<Arc<dyn BrowserEngine>>,
        cookies: Arc<SessionCookies>,
    ) -> Self {
        Self {
            inner,
            engine,
            cookies,
            timeout: DEFAULT_CHALLENGE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bypass(
        &self,
        engine: &dyn BrowserEngine,
        request: &FetchRequest,
    ) -> Result<(), FetchError> {
        let url = request.url().as_str();
        let previous = self.cookies.remove(request.url(), CLEARANCE_COOKIE);
        let challenge = ChallengeRequest {
            url: request.url().clone(),
            user_agent: request
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            previous_clearance: previous.clone(),
        };

        let solve = tokio::time::timeout(self.timeout, engine.solve(challenge));
        let solved = match request.cancellation() {
            Some(token) => tokio::select! {
                () = token.cancelled() => return Err(FetchError::cancelled(url)),
                solved = solve => solved,
            },
            None => solve.await,
        };

        let clearance = match solved {
            Err(_) => {
                return Err(FetchError::challenge_bypass(
                    url,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
            Ok(Err(error)) => return Err(FetchError::challenge_bypass(url, error.to_string())),
            Ok(Ok(clearance)) => clearance,
        };

        match clearance.clearance_value() {
            Some(value) if previous.as_deref() != Some(value) => {}
            Some(_) => {
                return Err(FetchError::challenge_bypass(
                    url,
                    "clearance cookie did not change",
                ));
            }
            None => {
                return Err(FetchError::challenge_bypass(
                    url,
                    "no clearance cookie was set",
                ));
            }
        }

        for (name, value) in &clearance.cookies {
            self.cookies.set(request.url(), name, value);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ChallengeStage {
    #[instrument(skip(self, request), fields(url = %request.url()))]
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.ensure_active()?;
        let mut response = self.inner.execute(request.clone()).await?;
        if !is_challenge(&response) {
            return Ok(response);
        }
        let Some(host) = request.host().map(str::to_string) else {
            return Ok(response);
        };

        let Some(engine) = &self.engine else {
            warn!(host = %host, "challenge detected but no browser engine is available");
            response.headers_mut().insert(
                CHALLENGE_NOTICE_HEADER,
                HeaderValue::from_static("unavailable"),
            );
            return Ok(response);
        };

        info!(host = %host, "challenge detected, solving in browser engine");
        self.bypass(engine.as_ref(), &request).await?;
        info!(host = %host, "challenge cleared, re-issuing request");
        request.ensure_active()?;
        self.inner.execute(request).await
    }
}
