//! Error types for the mediacdn service

use thiserror::Error;

/// Result type alias for mediacdn operations
pub type Result<T> = std::result::Result<T, CdnError>;

/// Error types that can occur while serving a request
#[derive(Error, Debug, Clone)]
pub enum CdnError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unparseable request URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Origin not admitted: {0}")]
    AdmissionDenied(String),

    #[error("Origin unreachable: {0}")]
    OriginUnreachable(String),

    #[error("Origin refused request: status {status}")]
    OriginRefused { status: u16 },

    #[error("Origin blocked the fetch: {reason}")]
    OriginBlocked { reason: String },

    #[error("Not a supported media content-type: {0}")]
    NotMediaContent(String),

    #[error("Size cap exceeded: {size} > {max}")]
    SizeCapExceeded { size: u64, max: u64 },

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Billing store error: {0}")]
    BillingError(String),

    #[error("Usage persistence error: {0}")]
    UsageError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for CdnError {
    fn from(err: std::io::Error) -> Self {
        CdnError::StoreError(err.to_string())
    }
}

impl CdnError {
    /// Whether this error is answered with a 302 back to the origin URL.
    ///
    /// Everything except unparseable input falls back to the origin: the
    /// client gets the authoritative response and no 5xx ever leaves the
    /// service.
    pub fn redirects_to_origin(&self) -> bool {
        !matches!(self, CdnError::InvalidUrl(_) | CdnError::InvalidRange(_))
    }

    /// Whether a read-path failure with this error should be treated as a
    /// cache miss rather than surfaced.
    pub fn degrades_to_miss(&self) -> bool {
        matches!(self, CdnError::StoreError(_) | CdnError::RegistryError(_))
    }

    /// Advisory block reason to expose on a blocked-origin redirect, if any.
    pub fn block_reason(&self) -> Option<&str> {
        match self {
            CdnError::OriginBlocked { reason } => Some(reason),
            _ => None,
        }
    }
}
