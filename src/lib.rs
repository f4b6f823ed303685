//! mediacdn — a caching reverse proxy for images and streaming media
//!
//! Requests arrive as `/<host>/<path>`; the service validates and
//! normalizes the encoded origin, decides whether that origin is admitted,
//! and then serves the resource from a content-addressed object store or
//! streams it from the origin while teeing the bytes into the store. Every
//! failure short of an unparseable URL degrades to a 302 pointing at the
//! origin, so clients always end up with the authoritative response.
//!
//! # Components
//!
//! - [`request_url`]: URL decoding, path normalization and the SSRF gate
//!   every fetched URL must pass
//! - [`admission`]: mode-driven origin admission (`open`, `list`,
//!   `registered`) with blocklist precedence
//! - [`models`]: shared data types, including the `Range` header parser
//! - [`object_store`]: the get/head/ranged-get/put/delete port over the
//!   backing store, with filesystem and in-memory backends
//! - [`origin`]: streaming origin fetches with manual redirect
//!   re-validation and block/challenge detection
//! - [`stream_util`]: byte-counting and size-capped stream wrappers plus
//!   a bounded tee
//! - [`pipeline`]: the request pipeline tying the above together
//! - [`usage`]: durable per-tenant usage counters with periodic batched
//!   flush to a billing store
//! - [`media_type`]: exact-set media content-type classification
//! - [`metrics`], [`server`], [`tasks`], [`config`], [`error`]: the
//!   operational shell
//!
//! # Quick start
//!
//! ```rust,no_run
//! use mediacdn::config::CdnConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CdnConfig::from_env()?;
//! println!("serving on {}", config.listen_addr);
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod media_type;
pub mod metrics;
pub mod models;
pub mod object_store;
pub mod origin;
pub mod pipeline;
pub mod request_url;
pub mod server;
pub mod stream_util;
pub mod tasks;
pub mod usage;

pub use admission::{Admission, DomainRegistry, FileRegistry, MemoryRegistry};
pub use config::{CdnConfig, OriginMode};
pub use error::{CdnError, Result};
pub use metrics::{CdnMetrics, MetricsSnapshot};
pub use models::{AdmissionResult, DomainRecord, ObjectMetadata, RangeSpec, TenantStatus};
pub use object_store::{FsObjectStore, MemoryObjectStore, ObjectInfo, ObjectStore, StoredObject};
pub use origin::{FetchRequest, FetchedMedia, HttpOriginFetcher, OriginFetcher, RedirectGate};
pub use pipeline::RequestPipeline;
pub use server::CdnServer;
pub use tasks::BackgroundTasks;
pub use usage::{BillingStore, JsonlBillingStore, UsageAggregator};
