//! Origin admission: mode-driven allow/block decisions
//!
//! The blocklist always wins. After that, `open` admits every valid host,
//! `list` admits hosts matching the configured patterns, and `registered`
//! admits only hosts with at least one active registry record. In the two
//! permissive modes the registry is still read opportunistically so usage
//! can be attributed to tenants.

use crate::config::{CdnConfig, OriginMode};
use crate::error::{CdnError, Result};
use crate::models::{AdmissionReason, AdmissionResult, AdmissionSource, DomainRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Keyed read access to the tenant/domain registry
#[async_trait]
pub trait DomainRegistry: Send + Sync {
    /// Look up the records registered for a host. A missing key and an
    /// empty list are equivalent.
    async fn lookup(&self, host: &str) -> Result<Option<Vec<DomainRecord>>>;
}

/// JSON-file registry for self-hosted deployments.
///
/// The file maps host names to record lists:
/// `{"example.com": [{"tenant_id": 7, "status": "active"}]}`
pub struct FileRegistry {
    path: PathBuf,
    entries: RwLock<HashMap<String, Vec<DomainRecord>>>,
}

impl FileRegistry {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let registry = FileRegistry {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(HashMap::new()),
        };
        registry.reload().await?;
        Ok(registry)
    }

    /// Re-read the backing file, replacing the in-memory table.
    pub async fn reload(&self) -> Result<()> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CdnError::RegistryError(format!("read {}: {}", self.path.display(), e)))?;
        let parsed: HashMap<String, Vec<DomainRecord>> = serde_json::from_str(&content)
            .map_err(|e| CdnError::RegistryError(format!("parse {}: {}", self.path.display(), e)))?;
        *self.entries.write().await = parsed;
        Ok(())
    }
}

#[async_trait]
impl DomainRegistry for FileRegistry {
    async fn lookup(&self, host: &str) -> Result<Option<Vec<DomainRecord>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(host).filter(|v| !v.is_empty()).cloned())
    }
}

/// In-memory registry, used in tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryRegistry {
    entries: RwLock<HashMap<String, Vec<DomainRecord>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, host: impl Into<String>, records: Vec<DomainRecord>) {
        self.entries.write().await.insert(host.into(), records);
    }
}

#[async_trait]
impl DomainRegistry for MemoryRegistry {
    async fn lookup(&self, host: &str) -> Result<Option<Vec<DomainRecord>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(host).filter(|v| !v.is_empty()).cloned())
    }
}

/// One parsed allow/block pattern
#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginPattern {
    /// `*` — matches every host
    All,
    /// Exact host match
    Exact(String),
    /// `*.parent` — proper subdomains of `parent`, never `parent` itself
    Subdomains(String),
}

impl OriginPattern {
    fn parse(raw: &str) -> Option<OriginPattern> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return None;
        }
        if raw == "*" {
            return Some(OriginPattern::All);
        }
        if let Some(parent) = raw.strip_prefix("*.") {
            if parent.is_empty() {
                return None;
            }
            return Some(OriginPattern::Subdomains(parent.to_string()));
        }
        Some(OriginPattern::Exact(raw))
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            OriginPattern::All => true,
            OriginPattern::Exact(h) => host == h,
            OriginPattern::Subdomains(parent) => {
                host.len() > parent.len() + 1
                    && host.ends_with(parent.as_str())
                    && host.as_bytes()[host.len() - parent.len() - 1] == b'.'
            }
        }
    }
}

fn parse_patterns(raw: &str) -> Vec<OriginPattern> {
    raw.split(',').filter_map(OriginPattern::parse).collect()
}

/// The admission decision engine
pub struct Admission {
    mode: OriginMode,
    allow_patterns: Vec<OriginPattern>,
    block_patterns: Vec<OriginPattern>,
    registry: Option<Arc<dyn DomainRegistry>>,
}

impl Admission {
    pub fn from_config(config: &CdnConfig, registry: Option<Arc<dyn DomainRegistry>>) -> Self {
        Admission {
            mode: config.origin_mode,
            allow_patterns: parse_patterns(&config.allowed_origins),
            block_patterns: parse_patterns(&config.blocked_origins),
            registry,
        }
    }

    /// Decide whether `host` may be served, and which tenants accrue usage.
    pub async fn validate(&self, host: &str) -> AdmissionResult {
        // Blocklist precedence: a match denies regardless of mode
        if self.block_patterns.contains(&OriginPattern::All) {
            debug!(host, "denied by kill switch");
            return AdmissionResult::deny(AdmissionReason::KillSwitch, AdmissionSource::Config);
        }
        if self.block_patterns.iter().any(|p| p.matches(host)) {
            debug!(host, "denied by blocklist");
            return AdmissionResult::deny(AdmissionReason::Blocklisted, AdmissionSource::Config);
        }

        match self.mode {
            OriginMode::Open => {
                let records = self.opportunistic_lookup(host).await;
                AdmissionResult::allow(AdmissionReason::OpenMode, AdmissionSource::Default)
                    .with_records(records)
            }
            OriginMode::List => {
                if self.allow_patterns.iter().any(|p| p.matches(host)) {
                    let records = self.opportunistic_lookup(host).await;
                    AdmissionResult::allow(AdmissionReason::AllowListMatch, AdmissionSource::Config)
                        .with_records(records)
                } else {
                    AdmissionResult::deny(AdmissionReason::NotInAllowList, AdmissionSource::Config)
                }
            }
            OriginMode::Registered => self.validate_registered(host).await,
            OriginMode::Unknown => {
                warn!(host, "unknown origin mode, denying");
                AdmissionResult::deny(AdmissionReason::UnknownMode, AdmissionSource::Default)
            }
        }
    }

    async fn validate_registered(&self, host: &str) -> AdmissionResult {
        let registry = match &self.registry {
            Some(r) => r,
            None => {
                error!("registered mode configured without a registry binding");
                return AdmissionResult::deny(
                    AdmissionReason::RegistryUnavailable,
                    AdmissionSource::Default,
                );
            }
        };
        match registry.lookup(host).await {
            Ok(Some(records)) => {
                let has_active = records
                    .iter()
                    .any(|r| r.status == crate::models::TenantStatus::Active);
                if has_active {
                    AdmissionResult::allow(
                        AdmissionReason::RegisteredActive,
                        AdmissionSource::Registry,
                    )
                    .with_records(records)
                } else {
                    AdmissionResult::deny(
                        AdmissionReason::NoActiveTenant,
                        AdmissionSource::Registry,
                    )
                    .with_records(records)
                }
            }
            Ok(None) => {
                AdmissionResult::deny(AdmissionReason::NotRegistered, AdmissionSource::Registry)
            }
            Err(e) => {
                warn!(host, error = %e, "registry lookup failed");
                AdmissionResult::deny(
                    AdmissionReason::RegistryUnavailable,
                    AdmissionSource::Registry,
                )
            }
        }
    }

    /// Read the registry for usage attribution without letting a failure
    /// affect the admission decision.
    async fn opportunistic_lookup(&self, host: &str) -> Vec<DomainRecord> {
        let Some(registry) = &self.registry else {
            return Vec::new();
        };
        match registry.lookup(host).await {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!(host, error = %e, "opportunistic registry lookup failed");
                Vec::new()
            }
        }
    }
}
