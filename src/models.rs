//! Core data models shared across the request pipeline

use serde::{Deserialize, Serialize};

/// A single resolved byte interval from an HTTP `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
    /// Number of bytes covered (`end - start + 1`)
    pub length: u64,
    /// False when the interval covers the entire object
    pub is_partial: bool,
}

impl RangeSpec {
    /// Parse a `Range` header against a known total size.
    ///
    /// Accepts the three single-interval forms `bytes=A-B`, `bytes=-S` and
    /// `bytes=A-`. Returns `None` for anything else: a unit other than
    /// `bytes`, multipart ranges, non-integer components, `start > end`
    /// after clamping the end to `total_size - 1`, or a start at or past
    /// the end of the object.
    ///
    /// The full-file probe `bytes=0-` resolves with `is_partial == false`;
    /// the caller still answers it with a 206 so players detect range
    /// support.
    pub fn parse(header: &str, total_size: u64) -> Option<RangeSpec> {
        let header = header.trim();
        let spec = header.strip_prefix("bytes=")?;
        if spec.contains(',') {
            // Multipart ranges are out of scope
            return None;
        }

        let (raw_start, raw_end) = spec.split_once('-')?;
        let raw_start = raw_start.trim();
        let raw_end = raw_end.trim();

        let (start, end) = if raw_start.is_empty() {
            // Suffix form: bytes=-S, the final S bytes
            let suffix: u64 = raw_end.parse().ok()?;
            if suffix == 0 || total_size == 0 {
                return None;
            }
            (total_size.saturating_sub(suffix), total_size - 1)
        } else {
            let start: u64 = raw_start.parse().ok()?;
            if start >= total_size {
                return None;
            }
            let end = if raw_end.is_empty() {
                // Open form: bytes=A-
                total_size - 1
            } else {
                let end: u64 = raw_end.parse().ok()?;
                end.min(total_size - 1)
            };
            (start, end)
        };

        if start > end {
            return None;
        }

        Some(RangeSpec {
            start,
            end,
            length: end - start + 1,
            is_partial: !(start == 0 && end == total_size - 1),
        })
    }

    /// Format a `Content-Range` header value for this interval.
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

/// Registration status of a tenant for a given origin host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Blocked,
    Suspended,
}

/// One tenant's claim on an origin host, as stored in the domain registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub tenant_id: i64,
    pub status: TenantStatus,
}

/// Where an admission decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionSource {
    Config,
    Registry,
    Default,
}

/// Why an admission decision fell the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionReason {
    OpenMode,
    AllowListMatch,
    RegisteredActive,
    Blocklisted,
    KillSwitch,
    NotInAllowList,
    NotRegistered,
    NoActiveTenant,
    RegistryUnavailable,
    UnknownMode,
}

/// Outcome of an origin admission check
#[derive(Debug, Clone)]
pub struct AdmissionResult {
    pub allowed: bool,
    pub reason: AdmissionReason,
    pub source: AdmissionSource,
    /// Registry records for the host, when a registry was consulted.
    /// Bandwidth accrues to every active tenant listed here.
    pub records: Vec<DomainRecord>,
}

impl AdmissionResult {
    pub fn allow(reason: AdmissionReason, source: AdmissionSource) -> Self {
        AdmissionResult {
            allowed: true,
            reason,
            source,
            records: Vec::new(),
        }
    }

    pub fn deny(reason: AdmissionReason, source: AdmissionSource) -> Self {
        AdmissionResult {
            allowed: false,
            reason,
            source,
            records: Vec::new(),
        }
    }

    pub fn with_records(mut self, records: Vec<DomainRecord>) -> Self {
        self.records = records;
        self
    }

    /// Tenant ids that accrue usage for this request.
    pub fn active_tenants(&self) -> impl Iterator<Item = i64> + '_ {
        self.records
            .iter()
            .filter(|r| r.status == TenantStatus::Active)
            .map(|r| r.tenant_id)
    }
}

/// Custom metadata stored alongside every cached object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub source_url: String,
    pub origin_host: String,
    /// ISO-8601 timestamp of the original store write
    pub cached_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_range() {
        let r = RangeSpec::parse("bytes=0-1023", 4096).unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 1023);
        assert_eq!(r.length, 1024);
        assert!(r.is_partial);
    }

    #[test]
    fn test_full_file_probe_is_not_partial() {
        let r = RangeSpec::parse("bytes=0-", 4096).unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 4095);
        assert_eq!(r.length, 4096);
        assert!(!r.is_partial);
    }

    #[test]
    fn test_suffix_range() {
        let r = RangeSpec::parse("bytes=-100", 4096).unwrap();
        assert_eq!(r.start, 3996);
        assert_eq!(r.end, 4095);
        assert!(r.is_partial);
    }

    #[test]
    fn test_suffix_larger_than_file_covers_whole_file() {
        let r = RangeSpec::parse("bytes=-5000", 4096).unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 4095);
        assert!(!r.is_partial);
    }

    #[test]
    fn test_end_clamped_to_size() {
        let r = RangeSpec::parse("bytes=4000-9999", 4096).unwrap();
        assert_eq!(r.end, 4095);
        assert_eq!(r.length, 96);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(RangeSpec::parse("bytes=-0", 4096).is_none());
        assert!(RangeSpec::parse("bytes=4096-", 4096).is_none());
        assert!(RangeSpec::parse("bytes=5000-6000", 4096).is_none());
        assert!(RangeSpec::parse("bytes=100-50", 4096).is_none());
        assert!(RangeSpec::parse("items=0-10", 4096).is_none());
        assert!(RangeSpec::parse("bytes=0-10,20-30", 4096).is_none());
        assert!(RangeSpec::parse("bytes=a-b", 4096).is_none());
        assert!(RangeSpec::parse("bytes=0-", 0).is_none());
    }

    #[test]
    fn test_content_range_format() {
        let r = RangeSpec::parse("bytes=0-99", 1000).unwrap();
        assert_eq!(r.content_range(1000), "bytes 0-99/1000");
    }

    #[test]
    fn test_active_tenants_filter() {
        let result = AdmissionResult::allow(AdmissionReason::OpenMode, AdmissionSource::Default)
            .with_records(vec![
                DomainRecord {
                    tenant_id: 1,
                    status: TenantStatus::Active,
                },
                DomainRecord {
                    tenant_id: 2,
                    status: TenantStatus::Suspended,
                },
                DomainRecord {
                    tenant_id: 3,
                    status: TenantStatus::Active,
                },
            ]);
        let active: Vec<i64> = result.active_tenants().collect();
        assert_eq!(active, vec![1, 3]);
    }

    #[test]
    fn test_object_metadata_json_field_names() {
        let meta = ObjectMetadata {
            source_url: "https://example.com/a.jpg".into(),
            origin_host: "example.com".into(),
            cached_at: "2025-06-01T00:00:00Z".into(),
            content_length: Some(1024),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"sourceUrl\""));
        assert!(json.contains("\"originHost\""));
        assert!(json.contains("\"cachedAt\""));
        assert!(json.contains("\"contentLength\""));
    }
}
