//! Configuration management for the mediacdn service

use crate::error::{CdnError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// How origin hosts are admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginMode {
    /// Any host that passes validation is served
    Open,
    /// Only hosts matching the configured allow-list
    List,
    /// Only hosts with at least one active registry record
    Registered,
    /// Unrecognized mode string; admission denies everything
    Unknown,
}

impl OriginMode {
    fn parse(s: &str) -> OriginMode {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => OriginMode::Open,
            "list" => OriginMode::List,
            "registered" => OriginMode::Registered,
            _ => OriginMode::Unknown,
        }
    }
}

// Lenient by design: an unrecognized mode string must deserialize to
// Unknown (which denies everything) rather than fail the whole config
impl<'de> Deserialize<'de> for OriginMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(OriginMode::parse(&raw))
    }
}

/// Service configuration
///
/// Loadable from a YAML file or from the environment. Every field has a
/// default so a bare `CdnConfig::default()` is a working open-mode,
/// memory-store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Origin admission mode (default: open)
    #[serde(default = "default_origin_mode")]
    pub origin_mode: OriginMode,

    /// Comma-separated allow patterns for `list` mode
    #[serde(default)]
    pub allowed_origins: String,

    /// Comma-separated always-deny patterns; `*` is a kill switch
    #[serde(default)]
    pub blocked_origins: String,

    /// Largest object the service will fetch and cache, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Origin fetch deadline in milliseconds (default: 30000)
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Outbound User-Agent override
    #[serde(default = "default_user_agent")]
    pub origin_user_agent: String,

    /// Append X-Forwarded-For with the client address on origin fetches
    #[serde(default)]
    pub forward_client_ip: bool,

    /// Gate for the view-mode debug output
    #[serde(default)]
    pub debug: bool,

    /// Object store directory; empty selects the in-memory store
    #[serde(default)]
    pub store_dir: String,

    /// Path to the JSON domain registry file; empty disables the registry
    #[serde(default)]
    pub registry_path: String,

    /// Path to the JSONL billing sink; empty disables billing flushes
    #[serde(default)]
    pub billing_path: String,

    /// Directory for durable per-tenant usage state; empty keeps counters
    /// in memory only
    #[serde(default)]
    pub usage_dir: String,

    /// Seconds between usage flushes to the billing store (default: 60)
    #[serde(default = "default_flush_interval_secs")]
    pub usage_flush_interval_secs: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_origin_mode() -> OriginMode {
    OriginMode::Open
}

fn default_max_file_size() -> u64 {
    500 * 1024 * 1024 // 500MB
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    format!("mediacdn/{}", env!("CARGO_PKG_VERSION"))
}

fn default_flush_interval_secs() -> u64 {
    60
}

impl Default for CdnConfig {
    fn default() -> Self {
        CdnConfig {
            listen_addr: default_listen_addr(),
            origin_mode: default_origin_mode(),
            allowed_origins: String::new(),
            blocked_origins: String::new(),
            max_file_size: default_max_file_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            origin_user_agent: default_user_agent(),
            forward_client_ip: false,
            debug: false,
            store_dir: String::new(),
            registry_path: String::new(),
            billing_path: String::new(),
            usage_dir: String::new(),
            usage_flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl CdnConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| CdnError::ConfigError(format!("failed to read config file: {}", e)))?;
        let config: CdnConfig = serde_yaml::from_str(&content)
            .map_err(|e| CdnError::ConfigError(format!("failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = CdnConfig::default();
        if let Ok(v) = env::var("LISTEN_ADDR") {
            config.listen_addr = v;
        }
        if let Ok(v) = env::var("ORIGIN_MODE") {
            config.origin_mode = OriginMode::parse(&v);
        }
        if let Ok(v) = env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = v;
        }
        if let Ok(v) = env::var("BLOCKED_ORIGINS") {
            config.blocked_origins = v;
        }
        if let Ok(v) = env::var("MAX_FILE_SIZE") {
            config.max_file_size = parse_size(&v)?;
        }
        if let Ok(v) = env::var("FETCH_TIMEOUT") {
            config.fetch_timeout_ms = v
                .parse()
                .map_err(|_| CdnError::ConfigError(format!("invalid FETCH_TIMEOUT: {}", v)))?;
        }
        if let Ok(v) = env::var("ORIGIN_USER_AGENT") {
            config.origin_user_agent = v;
        }
        if let Ok(v) = env::var("FORWARD_CLIENT_IP") {
            config.forward_client_ip = parse_bool(&v);
        }
        if let Ok(v) = env::var("DEBUG") {
            config.debug = parse_bool(&v);
        }
        if let Ok(v) = env::var("STORE_DIR") {
            config.store_dir = v;
        }
        if let Ok(v) = env::var("REGISTRY_PATH") {
            config.registry_path = v;
        }
        if let Ok(v) = env::var("BILLING_PATH") {
            config.billing_path = v;
        }
        if let Ok(v) = env::var("USAGE_DIR") {
            config.usage_dir = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(CdnError::ConfigError(
                "max_file_size must be greater than 0".to_string(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(CdnError::ConfigError(
                "fetch_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.usage_flush_interval_secs == 0 {
            return Err(CdnError::ConfigError(
                "usage_flush_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.origin_mode == OriginMode::List && self.allowed_origins.trim().is_empty() {
            return Err(CdnError::ConfigError(
                "list mode requires allowed_origins".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a human-readable size such as `50MB`, `512KB`, `1GB` or `1048576`.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    let upper = s.to_ascii_uppercase();
    let (number, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n.to_string(), 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n.to_string(), 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n.to_string(), 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n.to_string(), 1)
    } else {
        (upper.clone(), 1)
    };
    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CdnError::ConfigError(format!("invalid size value: {}", input)))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| CdnError::ConfigError(format!("size overflows: {}", input)))
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
