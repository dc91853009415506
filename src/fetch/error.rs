//! Error types for the resilience chain.
//!
//! [`FetchError`] is `Clone` so one outcome can be handed to every caller
//! that joined the same in-flight request.

use thiserror::Error;

/// Errors a fetch can end with.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network-level failure (DNS, connect, TLS, reset, body read, timeout).
    #[error("transport error fetching {url}: {message}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// Underlying error text.
        message: String,
        /// Whether the failure was a timeout.
        timeout: bool,
    },

    /// An anti-bot challenge was detected and could not be cleared.
    #[error("challenge bypass failed for {url}: {reason}")]
    ChallengeBypass {
        /// The URL that served the challenge.
        url: String,
        /// Why the bypass failed.
        reason: String,
    },

    /// The request's cancellation token fired before it could proceed.
    #[error("request cancelled: {url}")]
    Cancelled {
        /// The URL that was abandoned.
        url: String,
    },

    /// The URL could not be parsed or joined.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl FetchError {
    /// Creates a transport error from a reqwest error, keeping the timeout flag.
    pub fn transport(url: impl Into<String>, source: &reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            message: source.to_string(),
            timeout: source.is_timeout(),
        }
    }

    /// Creates a transport error from a message.
    pub fn transport_message(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
            timeout: false,
        }
    }

    /// Creates a challenge-bypass error.
    pub fn challenge_bypass(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChallengeBypass {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns `true` for failures the retry stage may repeat.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// No `From<reqwest::Error>`: every variant needs the URL, which reqwest errors
// don't always carry. Use the constructors above.
