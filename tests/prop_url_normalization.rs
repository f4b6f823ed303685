// Properties of path normalization and cache-key derivation: idempotence,
// and the guarantee that differently-encoded spellings of one logical
// resource land on one cache entry.

use http::Uri;
use mediacdn::request_url::{normalize_path, parse_request};
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_.~-]{1,12}".prop_filter("plain segments", |s| s != "." && s != "..")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_normalize_idempotent(path in "[a-zA-Z0-9_./-]{0,64}") {
        let once = normalize_path(&path);
        prop_assert_eq!(normalize_path(&once), once);
    }

    #[test]
    fn prop_normalized_path_has_no_dot_segments(path in "[a-zA-Z0-9_./-]{0,64}") {
        let normalized = normalize_path(&path);
        for segment in normalized.split('/') {
            prop_assert_ne!(segment, ".");
            prop_assert_ne!(segment, "..");
        }
        prop_assert!(normalized.starts_with('/'));
        prop_assert!(!normalized.contains("//"));
    }

    /// Inserting redundant `.` and `<seg>/..` pairs never changes the
    /// cache key.
    #[test]
    fn prop_redundant_segments_share_cache_key(
        segments in prop::collection::vec(segment(), 1..5),
        noise in segment(),
    ) {
        let plain = format!("/example.com/{}", segments.join("/"));
        let noisy = format!("/example.com/./{}/../{}", noise, segments.join("/"));

        let a = parse_request(&plain.parse::<Uri>().unwrap()).unwrap();
        let b = parse_request(&noisy.parse::<Uri>().unwrap()).unwrap();
        prop_assert_eq!(a.cache_key, b.cache_key);
        prop_assert_eq!(a.source_url, b.source_url);
    }

    /// Percent-encoding unreserved characters does not change the key.
    #[test]
    fn prop_encoding_equivalence(segments in prop::collection::vec(segment(), 1..4)) {
        let path = segments.join("/");
        let plain = format!("/example.com/{}", path);
        // Encode every alphanumeric character as %XX
        let encoded: String = path
            .bytes()
            .map(|b| {
                if b.is_ascii_alphanumeric() {
                    format!("%{:02X}", b)
                } else {
                    (b as char).to_string()
                }
            })
            .collect();
        let spelled = format!("/example.com/{}", encoded);

        let a = parse_request(&plain.parse::<Uri>().unwrap()).unwrap();
        let b = parse_request(&spelled.parse::<Uri>().unwrap()).unwrap();
        prop_assert_eq!(a.cache_key, b.cache_key);
    }

    /// The host segment is case-folded into the key.
    #[test]
    fn prop_host_case_insensitive(upper in prop::bool::ANY, segments in prop::collection::vec(segment(), 1..3)) {
        let host = if upper { "EXAMPLE.com" } else { "example.COM" };
        let uri: Uri = format!("/{}/{}", host, segments.join("/")).parse().unwrap();
        let target = parse_request(&uri).unwrap();
        prop_assert_eq!(target.host.as_str(), "example.com");
        prop_assert!(target.cache_key.starts_with("example.com/"));
    }
}

#[test]
fn test_traversal_cannot_escape_host() {
    // Dot-segments that collapse the whole path to `/` are a rejection
    for path in ["/example.com/..", "/example.com/a/../.."] {
        let uri: Uri = path.parse().unwrap();
        assert!(parse_request(&uri).is_err(), "{} should be rejected", path);
    }
    // Climbing past the root clamps there; the key stays under the host
    let uri: Uri = "/example.com/../../etc/passwd".parse().unwrap();
    let target = parse_request(&uri).unwrap();
    assert_eq!(target.cache_key, "example.com/etc/passwd");
    assert_eq!(target.source_url, "https://example.com/etc/passwd");
}
