//! Offline localization of fetched chapter documents.
//!
//! # Overview
//!
//! [`ContentLocalizer::localize`] turns a fetched page into a self-contained
//! document:
//!
//! 1. the title is read from the head before anything is removed
//! 2. `script` and `noscript` elements are removed
//! 3. the [`SiteLocalizer`] resolved for the host narrows the content
//! 4. stylesheets are saved once per host directory and linked as `../name`
//! 5. images are saved into the item directory as JPEG and linked as `./name`
//! 6. further pages linked from the content are reported for the caller to fetch
//!
//! The item directory is expected to be a direct child of the host directory,
//! so both relative references resolve from the saved document.
//!
//! HTML trees are not `Send`, so parsing and rewriting happen in synchronous
//! passes on either side of the asset fetches.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use novel_downloader_core::fetch::ResilienceChain;
//! use novel_downloader_core::localize::{ContentLocalizer, LocalizerRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let chain = Arc::new(ResilienceChain::builder().build()?);
//! let localizer = ContentLocalizer::new(chain, Arc::new(LocalizerRegistry::with_builtin()));
//! let page = url::Url::parse("https://www.royalroad.com/fiction/1/chapter/2")?;
//! let doc = localizer
//!     .localize("<html>...</html>", &page, Path::new("out/royalroad"), Path::new("out/royalroad/work"))
//!     .await?;
//! println!("{:?}", doc.title);
//! # Ok(())
//! # }
//! ```

mod assets;
mod naming;
mod registry;
mod site;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kuchikiki::NodeRef;
use kuchikiki::traits::TendrilSink;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

pub(crate) use assets::write_if_absent;
pub(crate) use naming::{
    document_name, linked_document_name, sanitize_filename_component, work_dir_name,
};
pub use registry::LocalizerRegistry;
pub use site::{
    COMMON_CONTENT_SELECTORS, CleanContext, ContentSelectorLocalizer, DetectingLocalizer,
    PassthroughLocalizer, SiteLocalizer, linked_pages_in,
};

use assets::{AssetFetcher, AssetOutcome, ensure_dir};
use site::select_all;

use crate::fetch::Transport;
use crate::user_agent;

/// Lazy-loading attributes checked after `src`.
const IMAGE_SOURCE_ATTRS: [&str; 3] = ["src", "data-src", "data-lazy-src"];

/// Attributes that would still point at the live site once `src` is rewritten.
const STALE_IMAGE_ATTRS: [&str; 5] = ["srcset", "data-src", "data-lazy-src", "data-srcset", "sizes"];

/// Errors that stop a document from being localized.
///
/// Individual asset failures are not errors; they are counted in [`AssetReport`].
#[derive(Debug, Error)]
pub enum LocalizeError {
    /// A directory or file could not be created.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An image could not be decoded or re-encoded.
    #[error("image conversion failed for {url}: {message}")]
    Image {
        /// The image URL.
        url: String,
        /// Decoder or encoder message.
        message: String,
    },
}

impl LocalizeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Image {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Per-kind asset counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetCounts {
    /// Fetched and written.
    pub saved: usize,
    /// Already present; not fetched.
    pub reused: usize,
    /// Could not be fetched or written.
    pub failed: usize,
}

impl AssetCounts {
    fn record(&mut self, outcome: &AssetOutcome) {
        match outcome {
            AssetOutcome::Saved(_) => self.saved += 1,
            AssetOutcome::Reused(_) => self.reused += 1,
            AssetOutcome::Failed => self.failed += 1,
        }
    }
}

/// What happened to a document's assets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetReport {
    pub stylesheets: AssetCounts,
    pub images: AssetCounts,
}

/// A document ready to be written to disk.
#[derive(Debug, Clone)]
pub struct LocalizedDocument {
    /// Serialized, cleaned HTML.
    pub html: String,
    /// Text of the head `<title>`, if non-empty.
    pub title: Option<String>,
    pub report: AssetReport,
    /// Further pages of the chapter linked from its content.
    pub linked_pages: Vec<Url>,
}

/// A remote reference found in the document.
#[derive(Debug, Clone)]
struct AssetRef {
    /// Attribute value exactly as it appears in the document.
    original: String,
    /// Absolute URL.
    url: Url,
}

/// Output of the first synchronous pass.
#[derive(Debug)]
struct Prepared {
    html: String,
    title: Option<String>,
    stylesheets: Vec<AssetRef>,
    images: Vec<AssetRef>,
    linked_pages: Vec<Url>,
}

/// Cleans documents and rewrites their assets for offline reading.
#[derive(Debug, Clone)]
pub struct ContentLocalizer {
    transport: Arc<dyn Transport>,
    registry: Arc<LocalizerRegistry>,
    strip_directional_links: bool,
    user_agent: String,
}

impl ContentLocalizer {
    /// Creates a localizer whose sub-fetches go through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<LocalizerRegistry>) -> Self {
        Self {
            transport,
            registry,
            strip_directional_links: true,
            user_agent: user_agent::asset_user_agent(),
        }
    }

    /// Keep or strip "Previous/Next Chapter" style links. Stripped by default.
    #[must_use]
    pub fn with_directional_links_stripped(mut self, strip: bool) -> Self {
        self.strip_directional_links = strip;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &LocalizerRegistry {
        &self.registry
    }

    /// Localizes `document`, fetched from `page_url`.
    ///
    /// Stylesheets go to `host_dir`, images to `item_dir`; both are created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizeError::Io`] if an output directory cannot be created.
    pub async fn localize(
        &self,
        document: &str,
        page_url: &Url,
        host_dir: &Path,
        item_dir: &Path,
    ) -> Result<LocalizedDocument, LocalizeError> {
        self.localize_inner(document, page_url, host_dir, item_dir, None)
            .await
    }

    /// Like [`localize`](Self::localize), with every asset request bound to `cancel`.
    ///
    /// Once `cancel` fires, remaining assets are not fetched and the document
    /// is returned with their original references.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizeError::Io`] if an output directory cannot be created.
    pub async fn localize_with_cancellation(
        &self,
        document: &str,
        page_url: &Url,
        host_dir: &Path,
        item_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<LocalizedDocument, LocalizeError> {
        self.localize_inner(document, page_url, host_dir, item_dir, Some(cancel))
            .await
    }

    #[instrument(skip(self, document, host_dir, item_dir, cancel), fields(url = %page_url))]
    async fn localize_inner(
        &self,
        document: &str,
        page_url: &Url,
        host_dir: &Path,
        item_dir: &Path,
        cancel: Option<&CancellationToken>,
    ) -> Result<LocalizedDocument, LocalizeError> {
        let site = self.registry.resolve(page_url.host_str().unwrap_or_default());
        let prepared = prepare(
            document,
            page_url,
            site.as_ref(),
            self.strip_directional_links,
        );
        debug!(
            site = site.name(),
            stylesheets = prepared.stylesheets.len(),
            images = prepared.images.len(),
            linked_pages = prepared.linked_pages.len(),
            "document cleaned"
        );

        ensure_dir(host_dir).await?;
        ensure_dir(item_dir).await?;

        let fetcher = AssetFetcher::new(self.transport.as_ref(), &self.user_agent, cancel);
        let mut report = AssetReport::default();

        let mut stylesheet_refs: HashMap<String, Option<String>> = HashMap::new();
        let mut by_url: HashMap<Url, AssetOutcome> = HashMap::new();
        let mut names = NameClaims::default();
        for asset in &prepared.stylesheets {
            let outcome = match by_url.get(&asset.url) {
                Some(outcome) => outcome.clone(),
                None => {
                    let name = names.claim(naming::stylesheet_name(&asset.url), &asset.url);
                    let outcome = fetcher.stylesheet(&asset.url, host_dir, &name).await;
                    report.stylesheets.record(&outcome);
                    by_url.insert(asset.url.clone(), outcome.clone());
                    outcome
                }
            };
            stylesheet_refs.insert(asset.original.clone(), outcome.local_ref().map(str::to_string));
        }

        let mut image_refs: HashMap<String, String> = HashMap::new();
        for asset in &prepared.images {
            let outcome = match by_url.get(&asset.url) {
                Some(outcome) => outcome.clone(),
                None => {
                    let name = names.claim(naming::image_name(&asset.url), &asset.url);
                    let outcome = fetcher.image(&asset.url, item_dir, &name).await;
                    report.images.record(&outcome);
                    by_url.insert(asset.url.clone(), outcome.clone());
                    outcome
                }
            };
            if let Some(local) = outcome.local_ref() {
                image_refs.insert(asset.original.clone(), local.to_string());
            }
        }

        let html = rewrite(&prepared.html, &stylesheet_refs, &image_refs);
        Ok(LocalizedDocument {
            html,
            title: prepared.title,
            report,
            linked_pages: prepared.linked_pages,
        })
    }
}

/// File names handed out within one document, so two URLs never share a file.
#[derive(Debug, Default)]
struct NameClaims {
    claimed: HashMap<String, Url>,
}

impl NameClaims {
    fn claim(&mut self, name: String, url: &Url) -> String {
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, extension)) => (stem.to_string(), format!(".{extension}")),
            None => (name.clone(), String::new()),
        };
        let mut candidate = name;
        let mut suffix = 1;
        while let Some(owner) = self.claimed.get(&candidate) {
            if owner == url {
                return candidate;
            }
            suffix += 1;
            candidate = format!("{stem}-{suffix}{extension}");
        }
        self.claimed.insert(candidate.clone(), url.clone());
        candidate
    }
}

/// Parses, cleans and collects remote assets.
fn prepare(document: &str, page_url: &Url, site: &dyn SiteLocalizer, strip_links: bool) -> Prepared {
    let root = kuchikiki::parse_html().one(document);
    let title = root
        .select_first("head title")
        .ok()
        .map(|title| title.as_node().text_contents().trim().to_string())
        .filter(|title| !title.is_empty());

    for node in select_all(&root, "script, noscript") {
        node.as_node().detach();
    }

    site.clean(
        &root,
        &CleanContext {
            title: title.as_deref(),
            strip_directional_links: strip_links,
        },
    );

    let mut stylesheets = Vec::new();
    for link in select_all(&root, "link[href]") {
        let attributes = link.attributes.borrow();
        if !is_stylesheet(attributes.get("rel")) {
            continue;
        }
        if let Some(asset) = attributes.get("href").and_then(|href| remote_ref(page_url, href)) {
            stylesheets.push(asset);
        }
    }

    let mut images = Vec::new();
    for img in select_all(&root, "img") {
        let Some(source) = image_source(&img.attributes.borrow()) else {
            continue;
        };
        if let Some(asset) = remote_ref(page_url, &source) {
            if site.keep_image(asset.url.as_str()) {
                images.push(asset);
            }
        }
    }

    let linked_pages = site.linked_pages(&root, page_url);

    Prepared {
        html: root.to_string(),
        title,
        stylesheets,
        images,
        linked_pages,
    }
}

/// Reparses the cleaned document and points assets at their local copies.
fn rewrite(
    html: &str,
    stylesheets: &HashMap<String, Option<String>>,
    images: &HashMap<String, String>,
) -> String {
    let root: NodeRef = kuchikiki::parse_html().one(html);

    for link in select_all(&root, "link[href]") {
        let href = link.attributes.borrow().get("href").map(str::to_string);
        let Some(local) = href.and_then(|href| stylesheets.get(&href)) else {
            continue;
        };
        match local {
            Some(local) => {
                link.attributes.borrow_mut().insert("href", local.clone());
            }
            None => link.as_node().detach(),
        }
    }

    for img in select_all(&root, "img") {
        let source = image_source(&img.attributes.borrow());
        let Some(local) = source.and_then(|source| images.get(&source)) else {
            continue;
        };
        let mut attributes = img.attributes.borrow_mut();
        for stale in STALE_IMAGE_ATTRS {
            attributes.remove(stale);
        }
        attributes.insert("src", local.clone());
    }

    root.to_string()
}

fn is_stylesheet(rel: Option<&str>) -> bool {
    rel.is_some_and(|rel| {
        rel.split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case("stylesheet"))
    })
}

fn image_source(attributes: &kuchikiki::Attributes) -> Option<String> {
    IMAGE_SOURCE_ATTRS
        .iter()
        .filter_map(|name| attributes.get(*name))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Resolves an attribute value against the page. Data URIs and non-HTTP schemes are left alone.
fn remote_ref(page_url: &Url, value: &str) -> Option<AssetRef> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with("data:") {
        return None;
    }
    let url = page_url.join(trimmed).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| AssetRef {
        original: value.to_string(),
        url,
    })
}
