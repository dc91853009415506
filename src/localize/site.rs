//! Per-site cleaning strategies.
//!
//! A [`SiteLocalizer`] is a stateless value chosen by hostname. The baseline
//! work (script removal, asset rewriting) is done by the caller; a site only
//! decides how to narrow the document to its readable content.

use std::fmt;
use std::sync::LazyLock;

use kuchikiki::{ElementData, NodeDataRef, NodeRef};
use regex::Regex;
use tracing::{debug, trace};
use url::Url;

/// Image paths that are never worth keeping offline.
const AVATAR_PATH: &str = "uploads/avatars";

/// `title` text of social share buttons inside chapter bodies.
const SHARE_LINK_TITLE: &str = "click to share";

/// Second-level labels under which a country TLD sells registrations (`example.co.uk`).
const SHARED_SECOND_LEVEL: [&str; 7] = ["ac", "co", "com", "edu", "gov", "net", "org"];

/// Link texts that only make sense on the live site.
const DIRECTIONAL_TEXTS: [&str; 2] = ["Project Page", "Glossary"];

/// Previous, next and table-of-contents link patterns.
static NAVIGATION_LINKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*\W*\s*Prev(?:ious)?(?:\sChapter)?\s*\W*\s*$",
        r"(?i)^\s*\W*\s*Next(?:\sChapter)?\s*\W*\s*$",
        r"(?i)^\s*\W*\s*(?:Index|TOC|Table of Contents)\s*\W*\s*$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Containers the detecting localizer tries, most specific first.
pub const COMMON_CONTENT_SELECTORS: [&str; 20] = [
    "div.chapter-content",
    "div.entry-content",
    "div.elementor-widget-theme-post-content",
    "article.hentry",
    "div.hentry",
    "div#chapter_body",
    "article#releases",
    "div.td-main-content",
    "div#content",
    "div.post-inner",
    "div.blog-content",
    "div#chapter-content",
    "div.panel-body",
    "div.post-entry",
    "div.text-formatting",
    "article.single__contents",
    "div#chapter",
    "section#StoryContent",
    "div.content-container",
    "article.article-content",
];

/// Inputs a site strategy may use while cleaning.
#[derive(Debug, Clone, Copy)]
pub struct CleanContext<'a> {
    /// Title taken from the document head before any cleaning.
    pub title: Option<&'a str>,
    /// Remove "Previous Chapter"/"Next Chapter"/"Index" style links.
    pub strip_directional_links: bool,
}

/// A per-site cleaning strategy.
pub trait SiteLocalizer: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Narrows `document` to its readable content. The default keeps everything.
    fn clean(&self, _document: &NodeRef, _context: &CleanContext<'_>) {}

    /// Whether the image at `src` should be fetched.
    fn keep_image(&self, _src: &str) -> bool {
        true
    }

    /// Further pages of the chapter linked from its content, in document order.
    ///
    /// Called on the cleaned document. The default follows nothing, since
    /// without a content container every navigation link would qualify.
    fn linked_pages(&self, _document: &NodeRef, _page_url: &Url) -> Vec<Url> {
        Vec::new()
    }
}

/// Keeps the document as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughLocalizer;

impl SiteLocalizer for PassthroughLocalizer {
    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Narrows the document to the first element matching a CSS selector.
#[derive(Debug, Clone)]
pub struct ContentSelectorLocalizer {
    selector: String,
}

impl ContentSelectorLocalizer {
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }
}

impl SiteLocalizer for ContentSelectorLocalizer {
    fn name(&self) -> &str {
        &self.selector
    }

    fn clean(&self, document: &NodeRef, context: &CleanContext<'_>) {
        if !isolate_content(document, &self.selector, context) {
            debug!(selector = %self.selector, "content selector matched nothing");
        }
    }

    fn keep_image(&self, src: &str) -> bool {
        !src.contains(AVATAR_PATH)
    }

    fn linked_pages(&self, document: &NodeRef, page_url: &Url) -> Vec<Url> {
        document
            .select_first(&self.selector)
            .map(|content| linked_pages_in(content.as_node(), page_url))
            .unwrap_or_default()
    }
}

/// Tries [`COMMON_CONTENT_SELECTORS`] in order and narrows to the first hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectingLocalizer;

impl SiteLocalizer for DetectingLocalizer {
    fn name(&self) -> &str {
        "detecting"
    }

    fn clean(&self, document: &NodeRef, context: &CleanContext<'_>) {
        for selector in COMMON_CONTENT_SELECTORS {
            if isolate_content(document, selector, context) {
                trace!(selector, "detected content container");
                return;
            }
        }
    }

    fn keep_image(&self, src: &str) -> bool {
        !src.contains(AVATAR_PATH)
    }

    fn linked_pages(&self, document: &NodeRef, page_url: &Url) -> Vec<Url> {
        COMMON_CONTENT_SELECTORS
            .iter()
            .find_map(|selector| document.select_first(selector).ok())
            .map(|content| linked_pages_in(content.as_node(), page_url))
            .unwrap_or_default()
    }
}

/// Same-site `<a href>` targets under `content`.
///
/// Fragments are dropped. Share buttons, the page itself, duplicates, non-HTTP
/// targets and links to another registrable domain are skipped.
pub fn linked_pages_in(content: &NodeRef, page_url: &Url) -> Vec<Url> {
    let mut page = page_url.clone();
    page.set_fragment(None);
    let Some(site) = page.host_str().map(registrable_domain) else {
        return Vec::new();
    };

    let mut links: Vec<Url> = Vec::new();
    for anchor in select_all(content, "a[href]") {
        let attributes = anchor.attributes.borrow();
        if attributes
            .get("title")
            .is_some_and(|title| title.to_lowercase().contains(SHARE_LINK_TITLE))
        {
            continue;
        }
        let Some(mut url) = attributes.get("href").and_then(|href| page.join(href.trim()).ok())
        else {
            continue;
        };
        url.set_fragment(None);
        if !matches!(url.scheme(), "http" | "https") || url == page || links.contains(&url) {
            continue;
        }
        if url.host_str().map(registrable_domain).as_deref() == Some(site.as_str()) {
            links.push(url);
        }
    }
    links
}

/// Approximates the registrable domain: the last two labels, or three under a
/// shared second level such as `co.uk`. IP addresses are returned whole.
pub(crate) fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }
    let labels: Vec<&str> = host.split('.').collect();
    let keep = match labels.as_slice() {
        [.., second, tld] if tld.len() == 2 && SHARED_SECOND_LEVEL.contains(second) => 3,
        _ => 2,
    };
    labels[labels.len().saturating_sub(keep)..].join(".")
}

/// Keeps only the first `selector` match, its title heading and its ancestors.
///
/// Returns `false`, leaving the document untouched, when nothing matches.
pub(crate) fn isolate_content(document: &NodeRef, selector: &str, context: &CleanContext<'_>) -> bool {
    let Ok(content) = document.select_first(selector) else {
        return false;
    };
    let content = content.as_node().clone();

    if let Some(title) = context.title {
        prepend_heading(&content, title);
    }
    if context.strip_directional_links {
        for link in select_all(&content, "a") {
            if is_directional_link(&link.as_node().text_contents()) {
                link.as_node().detach();
            }
        }
    }
    for boilerplate in select_all(
        document,
        ".post-navigation, .comments-container, .respond-container, #jp-post-flair, .wpcnt",
    ) {
        boilerplate.as_node().detach();
    }

    let mut current = content;
    while let Some(parent) = current.parent() {
        let siblings: Vec<NodeRef> = current
            .preceding_siblings()
            .chain(current.following_siblings())
            .collect();
        for sibling in siblings {
            sibling.detach();
        }
        if is_element(&parent, "body") {
            break;
        }
        current = parent;
    }
    true
}

/// Returns `true` for navigation link texts.
pub(crate) fn is_directional_link(text: &str) -> bool {
    let text = text.trim();
    if DIRECTIONAL_TEXTS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(text))
    {
        return true;
    }
    NAVIGATION_LINKS.iter().any(|regex| regex.is_match(text))
}

/// All elements under `node` matching `selector`, collected so callers may detach them.
pub(crate) fn select_all(node: &NodeRef, selector: &str) -> Vec<NodeDataRef<ElementData>> {
    node.select(selector)
        .map(Iterator::collect)
        .unwrap_or_default()
}

fn is_element(node: &NodeRef, local_name: &str) -> bool {
    node.as_element()
        .is_some_and(|element| &*element.name.local == local_name)
}

fn prepend_heading(content: &NodeRef, title: &str) {
    use kuchikiki::traits::TendrilSink;

    let scratch = kuchikiki::parse_html().one("<h4></h4><br>");
    let nodes: Vec<NodeRef> = select_all(&scratch, "h4, br")
        .into_iter()
        .map(|n| n.as_node().clone())
        .collect();
    // Insert in reverse so the heading ends up first.
    for node in nodes.into_iter().rev() {
        node.detach();
        if is_element(&node, "h4") {
            node.append(NodeRef::new_text(title));
        }
        content.prepend(node);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use kuchikiki::traits::TendrilSink;

    use super::*;

    const CHAPTER: &str = r#"<html><head><title>Ch 1</title></head><body>
        <header id="masthead"><nav>Menu</nav></header>
        <div id="main">
          <aside class="sidebar">Popular</aside>
          <div class="chapter-content">
            <p>First line.</p>
            <a href="/prev">Previous Chapter</a>
            <a href="/toc">Index</a>
            <a href="/glossary">Glossary</a>
            <a href="/wiki">A real link</a>
            <div class="post-navigation"><a href="/next">Next</a></div>
          </div>
          <div class="comments-container">Comments</div>
        </div>
        <footer>Footer</footer>
        </body></html>"#;

    fn parse(html: &str) -> NodeRef {
        kuchikiki::parse_html().one(html)
    }

    fn context(strip: bool) -> CleanContext<'static> {
        CleanContext {
            title: Some("Ch 1"),
            strip_directional_links: strip,
        }
    }

    // ==================== Directional Link Tests ====================

    #[test]
    fn test_is_directional_link() {
        for text in [
            "Previous Chapter",
            "  next chapter ",
            "Prev",
            "« Previous",
            "Next »",
            "[Next Chapter]",
            "Index",
            "Table of Contents",
            "TOC",
            "project page",
            "Glossary",
        ] {
            assert!(is_directional_link(text), "{text:?} should be directional");
        }
        for text in ["Next time on the show", "A real link", "Indexing"] {
            assert!(!is_directional_link(text), "{text:?} should be kept");
        }
    }

    // ==================== ContentSelectorLocalizer Tests ====================

    #[test]
    fn test_content_selector_isolates_content() {
        let document = parse(CHAPTER);
        ContentSelectorLocalizer::new("div.chapter-content").clean(&document, &context(true));
        let html = document.to_string();

        assert!(html.contains("First line."));
        assert!(html.contains("<h4>Ch 1</h4>"));
        assert!(html.contains("A real link"));
        for gone in [
            "Menu",
            "Popular",
            "Footer",
            "Comments",
            "Previous Chapter",
            ">Index<",
            "Glossary",
            "post-navigation",
        ] {
            assert!(!html.contains(gone), "{gone} should be removed: {html}");
        }
        // The head survives narrowing.
        assert!(html.contains("<title>Ch 1</title>"));
    }

    #[test]
    fn test_directional_links_kept_when_disabled() {
        let document = parse(CHAPTER);
        ContentSelectorLocalizer::new("div.chapter-content").clean(&document, &context(false));
        assert!(document.to_string().contains("Previous Chapter"));
    }

    #[test]
    fn test_heading_precedes_content() {
        let document = parse(CHAPTER);
        ContentSelectorLocalizer::new("div.chapter-content").clean(&document, &context(false));
        let html = document.to_string();
        let heading = html.find("<h4>").unwrap();
        let first_line = html.find("First line.").unwrap();
        assert!(heading < first_line);
    }

    #[test]
    fn test_unmatched_selector_leaves_document() {
        let document = parse(CHAPTER);
        let before = document.to_string();
        ContentSelectorLocalizer::new("div.nope").clean(&document, &context(true));
        assert_eq!(document.to_string(), before);
    }

    #[test]
    fn test_avatar_images_skipped() {
        let site = ContentSelectorLocalizer::new("div.chapter-content");
        assert!(!site.keep_image("https://h/wp-content/uploads/avatars/1.png"));
        assert!(site.keep_image("https://h/wp-content/uploads/2024/art.png"));
        assert!(PassthroughLocalizer.keep_image("https://h/uploads/avatars/1.png"));
    }

    // ==================== DetectingLocalizer Tests ====================

    #[test]
    fn test_detecting_picks_known_container() {
        let document = parse(
            r#"<html><head><title>T</title></head><body>
               <div class="sidebar">Ads</div>
               <div class="entry-content"><p>Story</p></div>
               </body></html>"#,
        );
        DetectingLocalizer.clean(&document, &context(true));
        let html = document.to_string();
        assert!(html.contains("Story"));
        assert!(!html.contains("Ads"));
    }

    #[test]
    fn test_detecting_without_match_is_noop() {
        let html = "<html><head></head><body><p>Plain</p></body></html>";
        let document = parse(html);
        let before = document.to_string();
        DetectingLocalizer.clean(&document, &context(true));
        assert_eq!(document.to_string(), before);
    }

    // ==================== Linked Page Tests ====================

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_linked_pages_filters_and_dedups() {
        let document = parse(
            r##"<html><body><div class="chapter-content">
                <p>Part one.</p>
                <a href="/c/1/2#top">Page 2</a>
                <a href="https://www.novels.example/c/1/3">Page 3</a>
                <a href="/c/1/2">Page 2 again</a>
                <a href="/c/1">This page</a>
                <a href="#note">Note</a>
                <a href="https://twitter.com/share">Tweet</a>
                <a href="/share?x=1" title="Click to share on Facebook">Share</a>
                <a href="mailto:tl@novels.example">Mail</a>
              </div><a href="/c/2">Outside content</a></body></html>"##,
        );
        let site = ContentSelectorLocalizer::new("div.chapter-content");
        let links = site.linked_pages(&document, &url("https://novels.example/c/1#comments"));

        assert_eq!(
            links,
            vec![
                url("https://novels.example/c/1/2"),
                url("https://www.novels.example/c/1/3"),
            ]
        );
    }

    #[test]
    fn test_linked_pages_only_from_content_container() {
        let document = parse(
            r#"<html><body><nav><a href="/c/2">Next</a></nav>
               <div class="entry-content"><a href="/c/1?page=2">2</a></div></body></html>"#,
        );
        let page = url("https://novels.example/c/1");
        assert_eq!(
            DetectingLocalizer.linked_pages(&document, &page),
            vec![url("https://novels.example/c/1?page=2")]
        );
        assert!(PassthroughLocalizer.linked_pages(&document, &page).is_empty());
        assert!(
            ContentSelectorLocalizer::new("div.nope")
                .linked_pages(&document, &page)
                .is_empty()
        );
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("www.novels.example"), "novels.example");
        assert_eq!(registrable_domain("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("localhost"), "localhost");
        assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn test_passthrough_keeps_everything() {
        let document = parse(CHAPTER);
        let before = document.to_string();
        PassthroughLocalizer.clean(&document, &context(true));
        assert_eq!(document.to_string(), before);
        assert_eq!(PassthroughLocalizer.name(), "passthrough");
    }
}
