//! User-Agent strings for chapter and asset requests.
//!
//! Chapter fetches identify the tool; asset sub-fetches made while localizing a
//! document use a fixed, separate identifier so hosts can tell them apart.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/novel-downloader";

/// Default User-Agent for chapter requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("novel-downloader/{version} (+{PROJECT_UA_URL})")
}

/// User-Agent sent with stylesheet and image sub-fetches.
#[must_use]
pub(crate) fn asset_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("novel-downloader-assets/{version} (offline-reader; +{PROJECT_UA_URL})")
}
