// Property: for every (start, end) with 0 <= start <= end < total, parsing
// "bytes=start-end" yields exactly {start, end, length = end-start+1} and
// is_partial is false only when the interval covers the whole object.

use mediacdn::models::RangeSpec;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_bounded_range_law(
        total in 1u64..=1_000_000_000u64,
        a in 0u64..=1_000_000_000u64,
        b in 0u64..=1_000_000_000u64,
    ) {
        let start = a.min(b) % total;
        let end = start + (a.max(b) - a.min(b)) % (total - start);

        let header = format!("bytes={}-{}", start, end);
        let parsed = RangeSpec::parse(&header, total).expect("valid range must parse");

        prop_assert_eq!(parsed.start, start);
        prop_assert_eq!(parsed.end, end);
        prop_assert_eq!(parsed.length, end - start + 1);
        prop_assert_eq!(parsed.is_partial, !(start == 0 && end == total - 1));
    }

    /// The end is clamped to the object size, never past it.
    #[test]
    fn prop_end_clamped(
        total in 1u64..=1_000_000u64,
        start in 0u64..=1_000_000u64,
        overshoot in 0u64..=1_000_000u64,
    ) {
        prop_assume!(start < total);
        let header = format!("bytes={}-{}", start, total + overshoot);
        let parsed = RangeSpec::parse(&header, total).expect("overshooting end still parses");
        prop_assert_eq!(parsed.end, total - 1);
        prop_assert!(parsed.length <= total);
    }

    /// A start at or past the object size is unsatisfiable.
    #[test]
    fn prop_start_past_end_rejected(
        total in 1u64..=1_000_000u64,
        past in 0u64..=1_000u64,
    ) {
        let header = format!("bytes={}-", total + past);
        prop_assert!(RangeSpec::parse(&header, total).is_none());
    }

    /// Suffix ranges take exactly the final S bytes (or the whole object
    /// when S >= total).
    #[test]
    fn prop_suffix_range(
        total in 1u64..=1_000_000u64,
        suffix in 1u64..=2_000_000u64,
    ) {
        let header = format!("bytes=-{}", suffix);
        let parsed = RangeSpec::parse(&header, total).expect("non-zero suffix parses");
        prop_assert_eq!(parsed.end, total - 1);
        prop_assert_eq!(parsed.length, suffix.min(total));
        prop_assert_eq!(parsed.is_partial, suffix < total);
    }

    /// Multipart ranges are always rejected.
    #[test]
    fn prop_multipart_rejected(
        a in 0u64..=1000u64,
        b in 0u64..=1000u64,
        c in 0u64..=1000u64,
        d in 0u64..=1000u64,
    ) {
        let header = format!("bytes={}-{},{}-{}", a, b, c, d);
        prop_assert!(RangeSpec::parse(&header, 1_000_000).is_none());
    }

    /// Garbage units never parse.
    #[test]
    fn prop_wrong_unit_rejected(unit in "[a-z]{1,8}", a in 0u64..=1000u64, b in 0u64..=1000u64) {
        prop_assume!(unit != "bytes");
        let header = format!("{}={}-{}", unit, a, b);
        prop_assert!(RangeSpec::parse(&header, 1_000_000).is_none());
    }
}

#[test]
fn test_full_file_probe_shape() {
    let parsed = RangeSpec::parse("bytes=0-", 4096).unwrap();
    assert_eq!(parsed.start, 0);
    assert_eq!(parsed.end, 4095);
    assert_eq!(parsed.length, 4096);
    assert!(!parsed.is_partial);
}

#[test]
fn test_boundary_cases() {
    // bytes=-0 is invalid
    assert!(RangeSpec::parse("bytes=-0", 100).is_none());
    // bytes=N- on a file of size N is unsatisfiable
    assert!(RangeSpec::parse("bytes=100-", 100).is_none());
    // last byte alone
    let last = RangeSpec::parse("bytes=99-99", 100).unwrap();
    assert_eq!((last.start, last.end, last.length), (99, 99, 1));
    assert!(last.is_partial);
}
