//! Session cookies shared by the transport and the challenge stage.
//!
//! [`SessionCookies`] wraps a [`reqwest::cookie::Jar`], which owns parsing,
//! expiry and domain/path matching. On top of the jar it adds what the
//! challenge stage needs: reading one cookie back, and forgetting one by
//! storing an already-expired copy. It can be seeded from a Netscape
//! `cookies.txt` export.

use std::collections::HashSet;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Cookie jar with lookup and removal by name.
#[derive(Default)]
pub struct SessionCookies {
    jar: Arc<Jar>,
}

impl SessionCookies {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing jar.
    #[must_use]
    pub fn from_jar(jar: Arc<Jar>) -> Self {
        Self { jar }
    }

    #[must_use]
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Stores `name=value` for the host of `url` on every path.
    pub fn set(&self, url: &Url, name: &str, value: &str) {
        self.jar.add_cookie_str(&format!("{name}={value}; Path=/"), url);
    }

    /// Returns the value of `name` that would be sent to `url`.
    #[must_use]
    pub fn get(&self, url: &Url, name: &str) -> Option<String> {
        let header = self.jar.cookies(url)?;
        let header = header.to_str().ok()?;
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    /// Forgets `name` for `url`, returning the value that was visible before.
    ///
    /// Expired copies are stored host-only and for the host's parent domains, so
    /// a cookie set with a `Domain` attribute is dropped as well.
    pub fn remove(&self, url: &Url, name: &str) -> Option<String> {
        let previous = self.get(url, name)?;
        let host = url.host_str()?;
        self.jar
            .add_cookie_str(&format!("{name}=; Max-Age=0; Path=/"), url);
        for domain in parent_domains(host) {
            self.jar.add_cookie_str(
                &format!("{name}=; Max-Age=0; Path=/; Domain={domain}"),
                url,
            );
        }
        if self.get(url, name).is_some() {
            warn!(host, name, "cookie is still visible after removal");
        } else {
            debug!(host, name, "cookie removed");
        }
        Some(previous)
    }

    /// Loads parsed `cookies.txt` lines into the jar. Returns how many were accepted.
    #[instrument(level = "debug", skip_all, fields(count = cookies.len()))]
    pub fn load_netscape(&self, cookies: &[CookieLine]) -> usize {
        let mut loaded = 0;
        for cookie in cookies {
            match origin_url(cookie) {
                Some(url) => {
                    self.jar.add_cookie_str(&set_cookie_string(cookie), &url);
                    loaded += 1;
                }
                None => warn!(
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "skipping cookie with unparseable domain"
                ),
            }
        }
        loaded
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar.set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

// Values never reach logs.
impl fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookies").finish_non_exhaustive()
    }
}

/// `www.a.example.com` → `www.a.example.com`, `a.example.com`, `example.com`.
fn parent_domains(host: &str) -> Vec<&str> {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Vec::new();
    }
    let mut domains = Vec::new();
    let mut rest = host;
    while rest.contains('.') {
        domains.push(rest);
        match rest.split_once('.') {
            Some((_, parent)) => rest = parent,
            None => break,
        }
    }
    domains
}

/// `Set-Cookie` form of a `cookies.txt` line.
fn set_cookie_string(cookie: &CookieLine) -> String {
    let mut parts = vec![format!("{}={}", cookie.name, cookie.value())];
    if cookie.tailmatch {
        parts.push(format!("Domain={}", cookie.domain.trim_start_matches('.')));
    }
    parts.push(format!("Path={}", cookie.path));
    if cookie.secure {
        parts.push("Secure".to_string());
    }
    // 0 is a session cookie.
    if cookie.expires > 0 {
        match UNIX_EPOCH.checked_add(Duration::from_secs(cookie.expires)) {
            Some(at) => parts.push(format!("Expires={}", httpdate::fmt_http_date(at))),
            None => warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                "cookie expiry overflows; treating as session cookie"
            ),
        }
    }
    parts.join("; ")
}

fn origin_url(cookie: &CookieLine) -> Option<Url> {
    let scheme = if cookie.secure { "https" } else { "http" };
    let domain = cookie.domain.trim_start_matches('.');
    Url::parse(&format!("{scheme}://{domain}{}", cookie.path)).ok()
}

// ==================== Netscape cookies.txt ====================

/// One line of a Netscape `cookies.txt` file.
///
/// The value is redacted from `Debug` output.
#[derive(Clone)]
pub struct CookieLine {
    /// Cookie domain (e.g. `.example.com`).
    pub domain: String,
    /// Whether subdomains match.
    pub tailmatch: bool,
    /// Path scope.
    pub path: String,
    /// HTTPS only.
    pub secure: bool,
    /// Unix expiry timestamp; 0 for a session cookie.
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl CookieLine {
    /// Returns the cookie value. Do not log it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors reading a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// The file could not be read.
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// The file had data lines but none of them parsed.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines.
        malformed_count: usize,
    },
}

/// Parses a Netscape cookie file: 7 TAB-separated fields per line.
///
/// Comment and blank lines are skipped. Malformed lines are logged and skipped.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure, or [`CookieError::NoCookiesFound`]
/// when the file has data lines but none parse.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<Vec<CookieLine>, CookieError> {
    let mut cookies = Vec::new();
    let mut malformed_count = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_cookie_line(line) {
            Some(cookie) => cookies.push(cookie),
            None => {
                malformed_count += 1;
                warn!(line = idx + 1, "skipping malformed cookie line");
            }
        }
    }

    if cookies.is_empty() && malformed_count > 0 {
        return Err(CookieError::NoCookiesFound { malformed_count });
    }
    Ok(cookies)
}

/// Reads a Netscape cookie file from disk into a new store.
///
/// # Errors
///
/// Returns a [`CookieError`] if the file cannot be read or has no valid cookies.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_cookie_file(path: &Path) -> Result<SessionCookies, CookieError> {
    let file = std::fs::File::open(path)?;
    let cookies = parse_netscape_cookies(std::io::BufReader::new(file))?;
    let store = SessionCookies::new();
    let loaded = store.load_netscape(&cookies);
    let domains: HashSet<&str> = cookies.iter().map(|c| c.domain.as_str()).collect();
    info!(cookies = loaded, domains = domains.len(), "Loaded cookies");
    Ok(store)
}

fn parse_cookie_line(line: &str) -> Option<CookieLine> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [domain, tailmatch, path, secure, expires, name, value] = fields.as_slice() else {
        return None;
    };
    if domain.is_empty() || name.is_empty() || !path.starts_with('/') {
        return None;
    }
    Some(CookieLine {
        domain: (*domain).to_string(),
        tailmatch: parse_flag(tailmatch)?,
        path: (*path).to_string(),
        secure: parse_flag(secure)?,
        expires: expires.parse().ok()?,
        name: (*name).to_string(),
        value: (*value).to_string(),
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "TRUE" => Some(true),
        "FALSE" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn receive(store: &SessionCookies, origin: &str, header: &'static str) {
        let value = HeaderValue::from_static(header);
        store.set_cookies(&mut std::iter::once(&value), &url(origin));
    }

    // ==================== SessionCookies Tests ====================

    #[test]
    fn test_set_get_and_remove_returns_value() {
        let store = SessionCookies::new();
        let page = url("https://example.com/c/1");
        store.set(&page, "cf_clearance", "abc");

        assert_eq!(
            store.get(&url("https://example.com/c/2"), "cf_clearance"),
            Some("abc".to_string())
        );
        assert_eq!(store.get(&url("https://other.com/"), "cf_clearance"), None);

        assert_eq!(store.remove(&page, "cf_clearance"), Some("abc".to_string()));
        assert_eq!(store.get(&page, "cf_clearance"), None);
        assert_eq!(store.remove(&page, "cf_clearance"), None);
    }

    #[test]
    fn test_remove_drops_domain_cookie_seen_from_subdomain() {
        let store = SessionCookies::new();
        receive(
            &store,
            "https://www.example.com/",
            "cf_clearance=old; Domain=example.com; Path=/",
        );
        let page = url("https://www.example.com/c/1");
        assert_eq!(store.get(&page, "cf_clearance"), Some("old".to_string()));

        assert_eq!(store.remove(&page, "cf_clearance"), Some("old".to_string()));
        assert_eq!(store.get(&page, "cf_clearance"), None);
    }

    #[test]
    fn test_remove_keeps_other_cookies() {
        let store = SessionCookies::new();
        let page = url("https://example.com/");
        store.set(&page, "a", "1");
        store.set(&page, "b", "2");
        store.remove(&page, "a");
        assert_eq!(store.get(&page, "b"), Some("2".to_string()));
    }

    #[test]
    fn test_set_cookie_without_path_is_scoped_to_request_directory() {
        let store = SessionCookies::new();
        receive(&store, "https://h.example/a/b", "k=v");

        assert_eq!(store.get(&url("https://h.example/a/c"), "k"), Some("v".to_string()));
        assert_eq!(store.get(&url("https://h.example/other"), "k"), None);
    }

    #[test]
    fn test_secure_cookie_not_sent_over_http() {
        let store = SessionCookies::new();
        receive(&store, "https://example.com/login", "sid=xyz; Path=/; Secure");
        assert!(store.get(&url("https://example.com/c/1"), "sid").is_some());
        assert_eq!(store.get(&url("http://example.com/c/1"), "sid"), None);
    }

    #[test]
    fn test_max_age_zero_deletes() {
        let store = SessionCookies::new();
        receive(&store, "https://example.com/", "a=1; Path=/");
        receive(&store, "https://example.com/", "a=gone; Max-Age=0; Path=/");
        assert_eq!(store.get(&url("https://example.com/"), "a"), None);
    }

    #[test]
    fn test_debug_redacts_values() {
        let store = SessionCookies::new();
        store.set(&url("https://example.com/"), "secret", "do-not-print");
        let debug = format!("{store:?}");
        assert!(!debug.contains("do-not-print"));
    }

    #[test]
    fn test_parent_domains() {
        assert_eq!(
            parent_domains("www.a.example.com"),
            vec!["www.a.example.com", "a.example.com", "example.com"]
        );
        assert!(parent_domains("localhost").is_empty());
        assert!(parent_domains("127.0.0.1").is_empty());
    }

    // ==================== Netscape Parser Tests ====================

    #[test]
    fn test_parse_netscape_cookies_skips_comments_and_malformed() {
        let input = "# Netscape HTTP Cookie File\n\
                     \n\
                     .example.com\tTRUE\t/\tTRUE\t0\tsid\tvalue1\n\
                     broken line\n\
                     example.org\tFALSE\t/c\tFALSE\t4102444800\tpref\tdark\n";
        let cookies = parse_netscape_cookies(input.as_bytes()).unwrap();

        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].domain, ".example.com");
        assert!(cookies[0].tailmatch);
        assert_eq!(cookies[0].value(), "value1");
        assert_eq!(cookies[1].path, "/c");
        assert_eq!(cookies[1].expires, 4_102_444_800);
    }

    #[test]
    fn test_parse_netscape_cookies_all_malformed_errors() {
        let result = parse_netscape_cookies("only\ttwo\n".as_bytes());
        assert!(matches!(
            result,
            Err(CookieError::NoCookiesFound { malformed_count: 1 })
        ));
    }

    #[test]
    fn test_cookie_line_debug_redacts_value() {
        let cookies =
            parse_netscape_cookies(".example.com\tTRUE\t/\tFALSE\t0\tsid\tsecret\n".as_bytes())
                .unwrap();
        let debug = format!("{:?}", cookies[0]);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_set_cookie_string_forms() {
        let cookies = parse_netscape_cookies(
            ".example.com\tTRUE\t/\tTRUE\t4102444800\tsid\tabc\nhost.org\tFALSE\t/c\tFALSE\t0\tp\tq\n"
                .as_bytes(),
        )
        .unwrap();
        assert_eq!(
            set_cookie_string(&cookies[0]),
            "sid=abc; Domain=example.com; Path=/; Secure; Expires=Fri, 01 Jan 2100 00:00:00 GMT"
        );
        assert_eq!(set_cookie_string(&cookies[1]), "p=q; Path=/c");
    }

    #[test]
    fn test_load_netscape_into_store() {
        let cookies = parse_netscape_cookies(
            ".example.com\tTRUE\t/\tFALSE\t0\tsid\tabc\nhost.org\tFALSE\t/\tFALSE\t0\tp\tq\n"
                .as_bytes(),
        )
        .unwrap();
        let store = SessionCookies::new();
        assert_eq!(store.load_netscape(&cookies), 2);
        assert_eq!(
            store.get(&url("http://www.example.com/"), "sid"),
            Some("abc".to_string())
        );
        assert_eq!(store.get(&url("http://host.org/x"), "p"), Some("q".to_string()));
        assert_eq!(store.get(&url("http://sub.host.org/x"), "p"), None);
    }

    #[test]
    fn test_load_cookie_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "example.com\tFALSE\t/\tFALSE\t0\tsid\tabc\n").unwrap();

        let store = load_cookie_file(&path).unwrap();
        assert_eq!(store.get(&url("http://example.com/"), "sid"), Some("abc".to_string()));
        assert!(load_cookie_file(&dir.path().join("missing.txt")).is_err());
    }
}
