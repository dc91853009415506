//! Hostname → [`SiteLocalizer`] lookup.

use std::sync::Arc;

use tracing::trace;

use super::site::{ContentSelectorLocalizer, DetectingLocalizer, PassthroughLocalizer, SiteLocalizer};

/// Hosts with a known content container.
const BUILTIN_SITES: [(&str, &str); 3] = [
    ("royalroad.com", "div.chapter-content"),
    ("scribblehub.com", "div#chp_raw"),
    ("wuxiaworld.com", "div.chapter-content"),
];

/// Maps hostname substrings to site strategies.
///
/// Later registrations take precedence, so callers can override the built-ins.
#[derive(Debug, Clone)]
pub struct LocalizerRegistry {
    entries: Vec<(String, Arc<dyn SiteLocalizer>)>,
    fallback: Arc<dyn SiteLocalizer>,
}

impl Default for LocalizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalizerRegistry {
    /// Empty registry whose fallback keeps documents as they are.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            fallback: Arc::new(PassthroughLocalizer),
        }
    }

    /// Registry with the built-in hosts and a fallback that detects common content containers.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new().with_fallback(Arc::new(DetectingLocalizer));
        for (host, selector) in BUILTIN_SITES {
            registry.register_localizer(host, Arc::new(ContentSelectorLocalizer::new(selector)));
        }
        registry
    }

    /// Replaces the strategy used for unmatched hosts.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn SiteLocalizer>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Uses `localizer` for every host containing `host_matcher` (case-insensitive).
    pub fn register_localizer(&mut self, host_matcher: &str, localizer: Arc<dyn SiteLocalizer>) {
        self.entries
            .push((host_matcher.to_ascii_lowercase(), localizer));
    }

    /// Strategy for `host`, or the fallback.
    #[must_use]
    pub fn resolve(&self, host: &str) -> Arc<dyn SiteLocalizer> {
        let host = host.to_ascii_lowercase();
        let found = self
            .entries
            .iter()
            .rev()
            .find(|(matcher, _)| host.contains(matcher.as_str()))
            .map(|(_, localizer)| Arc::clone(localizer));
        match found {
            Some(localizer) => {
                trace!(host = %host, localizer = localizer.name(), "site localizer resolved");
                localizer
            }
            None => Arc::clone(&self.fallback),
        }
    }

    /// Number of registered hosts, excluding the fallback.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
