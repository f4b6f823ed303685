//! Request URL decoding, path normalization and host validation
//!
//! The request path encodes the upstream origin as `/<host>/<rest>`. This
//! module turns that into a validated `(host, normalized_path)` pair, the
//! cache key derived from it, and the absolute source URL used for origin
//! fetches and fallback redirects. It is also the single gate every
//! absolute URL must pass before the fetcher will touch it, including
//! redirect hops.

use crate::error::{CdnError, Result};
use http::Uri;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Characters percent-encoded when rebuilding the outbound path.
/// Everything a URL path cannot carry verbatim, with `/` left intact.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'#')
    .add(b'%')
    .add(b'{')
    .add(b'}')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// Hostnames that always refer to the local machine
const LOCAL_HOSTNAMES: &[&str] = &["localhost", "localhost.localdomain", "broadcasthost"];

/// Suffix patterns for internal-only namespaces
const INTERNAL_SUFFIXES: &[&str] = &[
    ".local",
    ".localhost",
    ".internal",
    ".lan",
    ".home",
    ".corp",
    ".private",
];

/// Cloud metadata endpoints, exact and by suffix/prefix
const METADATA_EXACT: &[&str] = &["metadata.google.internal"];
const METADATA_SUFFIXES: &[&str] = &[".compute.internal", ".ec2.internal"];
const METADATA_PREFIXES: &[&str] = &["instance-data.", "metadata."];

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // LDH labels, at least one dot, alphabetic TLD of two or more letters
        Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$").unwrap()
    })
}

/// Everything the pipeline needs to know about one proxied resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Lowercased origin host taken from the first path segment
    pub host: String,
    /// Decoded, dot-resolved path below the host segment, with leading `/`
    pub path: String,
    /// Absolute URL of the resource at the origin
    pub source_url: String,
    /// Deterministic cache key: `host + path`
    pub cache_key: String,
    /// `?force=1|true` — bypass the cache and overwrite on completion
    pub force_refresh: bool,
    /// `?view=1|true` — debug view request, honored only with DEBUG=true
    pub view: bool,
}

/// Resolve `.` and `..` segments and collapse duplicate slashes.
///
/// The result always starts with `/`. `..` at the root is dropped rather
/// than rejected, matching lexical resolution.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Check a hostname against the SSRF denylist and the LDH shape rule.
pub fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if LOCAL_HOSTNAMES.contains(&host) {
        return false;
    }
    // IPv4 literal in any range, e.g. 10.0.0.1 or 999.1.2.3
    let dotted: Vec<&str> = host.split('.').collect();
    if dotted.len() == 4
        && dotted
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    {
        return false;
    }
    // IPv6 literals, bracketed or raw, and anything port-like
    if host.contains(':') || host.starts_with('[') {
        return false;
    }
    if INTERNAL_SUFFIXES.iter().any(|s| host.ends_with(s)) {
        return false;
    }
    if METADATA_EXACT.contains(&host)
        || METADATA_SUFFIXES.iter().any(|s| host.ends_with(s))
        || METADATA_PREFIXES.iter().any(|p| host.starts_with(p))
    {
        return false;
    }
    if host.starts_with("169.254.") {
        return false;
    }
    hostname_regex().is_match(host)
}

/// Parse the incoming request URI into a validated [`RequestTarget`].
pub fn parse_request(uri: &Uri) -> Result<RequestTarget> {
    let decoded = percent_decode_str(uri.path())
        .decode_utf8()
        .map_err(|e| CdnError::InvalidUrl(format!("undecodable path: {}", e)))?;

    let mut segments = decoded.split('/').filter(|s| !s.is_empty());
    let host = segments
        .next()
        .ok_or_else(|| CdnError::InvalidUrl("missing host segment".to_string()))?
        .to_ascii_lowercase();

    if !is_valid_hostname(&host) {
        return Err(CdnError::SecurityViolation(format!(
            "invalid origin host: {}",
            host
        )));
    }

    let remainder: Vec<&str> = segments.collect();
    let path = normalize_path(&remainder.join("/"));
    if path == "/" {
        return Err(CdnError::InvalidUrl(
            "no resource path after host segment".to_string(),
        ));
    }

    let encoded_path = utf8_percent_encode(&path, PATH_ENCODE_SET).to_string();
    let source_url = format!("https://{}{}", host, encoded_path);
    let cache_key = format!("{}{}", host, path);

    let (force_refresh, view) = parse_flags(uri.query());

    Ok(RequestTarget {
        host,
        path,
        source_url,
        cache_key,
        force_refresh,
        view,
    })
}

/// Rebuild the origin URL from a request path without any host
/// validation. Used only by the redirect error floor: a host that failed
/// admission or the SSRF gate still gets its 302 to the origin-as-written,
/// where the browser fails safely because the URL was never fetchable.
pub fn fallback_source_url(uri: &Uri) -> Option<String> {
    let decoded = percent_decode_str(uri.path()).decode_utf8().ok()?;
    let mut segments = decoded.split('/').filter(|s| !s.is_empty());
    let host = segments.next()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    let remainder: Vec<&str> = segments.collect();
    let path = normalize_path(&remainder.join("/"));
    if path == "/" {
        return None;
    }
    let encoded_path = utf8_percent_encode(&path, PATH_ENCODE_SET).to_string();
    Some(format!("https://{}{}", host, encoded_path))
}

/// Validate an absolute URL the fetcher is about to follow.
///
/// Applied to the initial fetch URL and to every redirect hop. A failure
/// here means the fetch is refused outright.
pub fn validate_fetch_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| CdnError::SecurityViolation(format!("unparseable fetch url: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CdnError::SecurityViolation(format!(
                "refusing scheme {}",
                other
            )))
        }
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(CdnError::SecurityViolation(
            "credentials embedded in url".to_string(),
        ));
    }
    // Url strips scheme-default ports, so any explicit port here is non-standard
    match url.port() {
        None | Some(80) | Some(443) => {}
        Some(port) => {
            return Err(CdnError::SecurityViolation(format!(
                "refusing non-standard port {}",
                port
            )))
        }
    }
    let host = url
        .host_str()
        .ok_or_else(|| CdnError::SecurityViolation("fetch url has no host".to_string()))?;
    if !is_valid_hostname(&host.to_ascii_lowercase()) {
        return Err(CdnError::SecurityViolation(format!(
            "fetch url host rejected: {}",
            host
        )));
    }
    Ok(url)
}

fn parse_flags(query: Option<&str>) -> (bool, bool) {
    let mut force = false;
    let mut view = false;
    if let Some(query) = query {
        for pair in query.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            let on = value == "1" || value.eq_ignore_ascii_case("true");
            match key {
                "force" => force = on,
                "view" => view = on,
                _ => {}
            }
        }
    }
    (force, view)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_basic_parse() {
        let t = parse_request(&uri("/example.com/images/a.jpg")).unwrap();
        assert_eq!(t.host, "example.com");
        assert_eq!(t.path, "/images/a.jpg");
        assert_eq!(t.cache_key, "example.com/images/a.jpg");
        assert_eq!(t.source_url, "https://example.com/images/a.jpg");
        assert!(!t.force_refresh);
        assert!(!t.view);
    }

    #[test]
    fn test_host_is_lowercased() {
        let t = parse_request(&uri("/Example.COM/a.png")).unwrap();
        assert_eq!(t.host, "example.com");
        assert_eq!(t.cache_key, "example.com/a.png");
    }

    #[test]
    fn test_dot_segments_are_resolved() {
        let t = parse_request(&uri("/example.com/a/../b/./c.mp4")).unwrap();
        assert_eq!(t.path, "/b/c.mp4");
    }

    #[test]
    fn test_encoded_and_plain_paths_share_a_cache_key() {
        let a = parse_request(&uri("/example.com/dir/file%20name.jpg")).unwrap();
        let b = parse_request(&uri("/example.com/dir/file name.jpg")).unwrap();
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(a.source_url, "https://example.com/dir/file%20name.jpg");
    }

    #[test]
    fn test_path_escaping_the_root_is_rejected() {
        // Everything above the host collapses back to /
        assert!(parse_request(&uri("/example.com/a/..")).is_err());
        assert!(parse_request(&uri("/example.com/")).is_err());
        assert!(parse_request(&uri("/example.com")).is_err());
    }

    #[test]
    fn test_flags() {
        let t = parse_request(&uri("/example.com/a.jpg?force=1&view=true")).unwrap();
        assert!(t.force_refresh);
        assert!(t.view);
        let t = parse_request(&uri("/example.com/a.jpg?force=0&view=no")).unwrap();
        assert!(!t.force_refresh);
        assert!(!t.view);
    }

    #[test]
    fn test_hostname_denylist() {
        assert!(!is_valid_hostname("localhost"));
        assert!(!is_valid_hostname("localhost.localdomain"));
        assert!(!is_valid_hostname("10.0.0.1"));
        assert!(!is_valid_hostname("999.1.2.3"));
        assert!(!is_valid_hostname("[::1]"));
        assert!(!is_valid_hostname("fe80::1"));
        assert!(!is_valid_hostname("router.lan"));
        assert!(!is_valid_hostname("printer.local"));
        assert!(!is_valid_hostname("vault.internal"));
        assert!(!is_valid_hostname("metadata.google.internal"));
        assert!(!is_valid_hostname("ip-10-0-0-1.ec2.internal"));
        assert!(!is_valid_hostname("metadata.example.com"));
        assert!(!is_valid_hostname("instance-data.example.com"));
        assert!(!is_valid_hostname("169.254.169.254"));
        assert!(!is_valid_hostname(""));
    }

    #[test]
    fn test_hostname_shape() {
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("cdn.media.example.co.uk"));
        assert!(!is_valid_hostname("example"));
        assert!(!is_valid_hostname("example.c"));
        assert!(!is_valid_hostname("example.123"));
        assert!(!is_valid_hostname("-bad.example.com"));
        assert!(!is_valid_hostname("exa mple.com"));
    }

    #[test]
    fn test_fetch_url_validation() {
        assert!(validate_fetch_url("https://example.com/a.jpg").is_ok());
        assert!(validate_fetch_url("http://example.com:80/a.jpg").is_ok());
        assert!(validate_fetch_url("https://example.com:443/a.jpg").is_ok());
        assert!(validate_fetch_url("ftp://example.com/a.jpg").is_err());
        assert!(validate_fetch_url("https://user:pw@example.com/a.jpg").is_err());
        assert!(validate_fetch_url("https://example.com:8443/a.jpg").is_err());
        assert!(validate_fetch_url("http://169.254.169.254/latest/meta-data").is_err());
        assert!(validate_fetch_url("http://localhost/x").is_err());
        assert!(validate_fetch_url("not a url").is_err());
    }

    #[test]
    fn test_fallback_source_url_skips_validation() {
        // Hosts the strict parser rejects still get an origin URL for the
        // redirect floor
        assert_eq!(
            fallback_source_url(&uri("/evil.local/x.jpg")).as_deref(),
            Some("https://evil.local/x.jpg")
        );
        assert_eq!(
            fallback_source_url(&uri("/169.254.169.254/latest/meta-data")).as_deref(),
            Some("https://169.254.169.254/latest/meta-data")
        );
        assert!(fallback_source_url(&uri("/example.com")).is_none());
        assert!(fallback_source_url(&uri("/")).is_none());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for p in ["/a/b/../c", "//x//y/", "/.", "/a/./b", ""] {
            let once = normalize_path(p);
            assert_eq!(normalize_path(&once), once);
        }
    }
}
