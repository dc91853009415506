//! File names for localized documents and assets.

use url::Url;

/// Longest title fragment kept in a document file name.
const MAX_TITLE_CHARS: usize = 80;

/// Replaces characters that are unsafe in file names and collapses runs of separators.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || matches!(c, '-' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    trimmed.to_string()
}

/// Last non-empty path segment of `url`, percent-decoded.
pub(crate) fn last_segment(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map_or_else(|_| segment.to_string(), std::borrow::Cow::into_owned);
    Some(decoded)
}

/// Local name for a stylesheet. Keeps the original name and forces `.css`.
pub(crate) fn stylesheet_name(url: &Url) -> String {
    let stem = last_segment(url)
        .map(|s| strip_extension(&s).to_string())
        .map(|s| sanitize_filename_component(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "style".to_string());
    format!("{stem}.css")
}

/// Local name for an image. Images are re-encoded, so the extension is always `.jpg`.
pub(crate) fn image_name(url: &Url) -> String {
    let stem = last_segment(url)
        .map(|s| strip_extension(&s).to_string())
        .map(|s| sanitize_filename_component(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{stem}.jpg")
}

/// Document name: `<order_id:04>-<title>.html`, falling back to the URL's last segment.
pub(crate) fn document_name(order_id: i64, title: Option<&str>, url: &Url) -> String {
    let title = title
        .map(sanitize_filename_component)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            last_segment(url)
                .map(|s| sanitize_filename_component(strip_extension(&s)))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "chapter".to_string());
    let title: String = title.chars().take(MAX_TITLE_CHARS).collect();
    format!("{order_id:04}-{title}.html")
}

/// Name for the `page`-th extra page of a chapter: `<order_id:04>-p<page>-<title>.html`.
pub(crate) fn linked_document_name(order_id: i64, page: usize, title: Option<&str>, url: &Url) -> String {
    let base = document_name(order_id, title, url);
    let rest = base.split_once('-').map_or(base.as_str(), |(_, rest)| rest);
    format!("{order_id:04}-p{page}-{rest}")
}

/// Directory name for a work, derived from its display name.
pub(crate) fn work_dir_name(name: &str, job_id: i64) -> String {
    let cleaned = sanitize_filename_component(name);
    if cleaned.is_empty() {
        format!("work-{job_id}")
    } else {
        cleaned
    }
}

fn strip_extension(segment: &str) -> &str {
    match segment.rfind('.') {
        Some(dot) if dot > 0 && segment.len() - dot <= 6 => &segment[..dot],
        _ => segment,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_sanitize_filename_component() {
        assert_eq!(sanitize_filename_component("Chapter 1: The Start"), "Chapter_1_The_Start");
        assert_eq!(sanitize_filename_component("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename_component("  "), "");
        assert_eq!(sanitize_filename_component("第一章"), "第一章");
    }

    #[test]
    fn test_last_segment_decodes_and_skips_trailing_slash() {
        assert_eq!(
            last_segment(&url("https://h/novel/chapter%201/")),
            Some("chapter 1".to_string())
        );
        assert_eq!(last_segment(&url("https://h/")), None);
    }

    #[test]
    fn test_asset_names() {
        assert_eq!(stylesheet_name(&url("https://h/css/main.min.css?v=3")), "main.min.css");
        assert_eq!(stylesheet_name(&url("https://h/")), "style.css");
        assert_eq!(image_name(&url("https://h/img/cover.png")), "cover.jpg");
        assert_eq!(image_name(&url("https://h/img/photo%20one.webp")), "photo_one.jpg");
        assert_eq!(image_name(&url("https://h/")), "image.jpg");
    }

    #[test]
    fn test_document_name_pads_order_and_falls_back() {
        let chapter = url("https://h/novel/chapter-12.html");
        assert_eq!(
            document_name(3, Some("Chapter 12 - Storm"), &chapter),
            "0003-Chapter_12_-_Storm.html"
        );
        assert_eq!(document_name(12, Some("  "), &chapter), "0012-chapter-12.html");
        assert_eq!(document_name(1, None, &url("https://h/")), "0001-chapter.html");
    }

    #[test]
    fn test_document_name_truncates_long_titles() {
        let long = "x".repeat(300);
        let name = document_name(1, Some(&long), &url("https://h/c"));
        assert_eq!(name.len(), "0001-".len() + MAX_TITLE_CHARS + ".html".len());
    }

    #[test]
    fn test_linked_document_name() {
        let page = url("https://h/novel/chapter-12?page=2");
        assert_eq!(
            linked_document_name(3, 2, Some("Chapter 12"), &page),
            "0003-p2-Chapter_12.html"
        );
        assert_eq!(linked_document_name(3, 3, None, &page), "0003-p3-chapter-12.html");
    }

    #[test]
    fn test_work_dir_name() {
        assert_eq!(work_dir_name("My Novel", 7), "My_Novel");
        assert_eq!(work_dir_name("???", 7), "work-7");
    }
}
