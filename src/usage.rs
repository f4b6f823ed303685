//! Per-tenant usage accounting with durable counters and periodic flush
//!
//! Each tenant has one counter block, keyed by tenant id, persisted to a
//! small JSON state file on every ingest so restarts lose nothing. A
//! single flush task snapshots non-idle tenants, performs one batched
//! billing write, and subtracts exactly the snapshotted amounts on
//! success. Increments that land while the write is in flight survive the
//! subtraction, so no byte is lost or double-counted.

use crate::error::{CdnError, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Counter block for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUsage {
    pub tenant_id: i64,
    pub origin_host: String,
    pub bandwidth_bytes: u64,
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl TenantUsage {
    fn new(tenant_id: i64, origin_host: &str) -> Self {
        TenantUsage {
            tenant_id,
            origin_host: origin_host.to_string(),
            bandwidth_bytes: 0,
            requests: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    fn is_idle(&self) -> bool {
        self.requests == 0
    }
}

/// One tenant's flushed amounts, as handed to the billing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageFlush {
    pub tenant_id: i64,
    pub origin_host: String,
    pub bandwidth_bytes: u64,
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Unix seconds of the hour bucket this flush rolls into
    pub hour_start: i64,
    /// ISO-8601 flush timestamp
    pub flushed_at: String,
}

/// Batched-write interface to the billing store.
///
/// A batch carries both the lifetime-total upsert and the hourly rollup
/// for each tenant; the adapter must make concurrent upserts on
/// `(tenant_id, hour_start)` additive.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn write_batch(&self, batch: &[UsageFlush]) -> Result<()>;
}

/// Append-only JSONL billing sink for self-hosted deployments
pub struct JsonlBillingStore {
    path: PathBuf,
}

impl JsonlBillingStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonlBillingStore {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl BillingStore for JsonlBillingStore {
    async fn write_batch(&self, batch: &[UsageFlush]) -> Result<()> {
        let mut out = Vec::new();
        for entry in batch {
            let line = serde_json::to_string(entry)
                .map_err(|e| CdnError::BillingError(format!("encode: {}", e)))?;
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CdnError::BillingError(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(&out)
            .await
            .map_err(|e| CdnError::BillingError(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| CdnError::BillingError(e.to_string()))?;
        Ok(())
    }
}

/// Durable per-tenant usage aggregator
pub struct UsageAggregator {
    counters: DashMap<i64, Mutex<TenantUsage>>,
    state_dir: Option<PathBuf>,
    billing: Option<Arc<dyn BillingStore>>,
}

impl UsageAggregator {
    /// Open the aggregator, rehydrating every persisted counter block
    /// before any request is serviced.
    pub async fn open(
        state_dir: Option<PathBuf>,
        billing: Option<Arc<dyn BillingStore>>,
    ) -> Result<Arc<Self>> {
        let aggregator = UsageAggregator {
            counters: DashMap::new(),
            state_dir,
            billing,
        };
        aggregator.rehydrate().await?;
        Ok(Arc::new(aggregator))
    }

    async fn rehydrate(&self) -> Result<()> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)
            .await
            .map_err(|e| CdnError::UsageError(format!("create {}: {}", dir.display(), e)))?;
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| CdnError::UsageError(e.to_string()))?;
        let mut loaded = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CdnError::UsageError(e.to_string()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("tenant_") || !name.ends_with(".json") {
                continue;
            }
            let raw = fs::read(entry.path())
                .await
                .map_err(|e| CdnError::UsageError(e.to_string()))?;
            match serde_json::from_slice::<TenantUsage>(&raw) {
                Ok(usage) => {
                    self.counters
                        .insert(usage.tenant_id, Mutex::new(usage));
                    loaded += 1;
                }
                Err(e) => warn!(file = %name, error = %e, "skipping corrupt usage state"),
            }
        }
        if loaded > 0 {
            info!(loaded, "rehydrated tenant usage counters");
        }
        Ok(())
    }

    fn state_path(&self, tenant_id: i64) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|d| d.join(format!("tenant_{}.json", tenant_id)))
    }

    async fn persist(&self, tenant_id: i64) -> Result<()> {
        let Some(path) = self.state_path(tenant_id) else {
            return Ok(());
        };
        let snapshot = match self.counters.get(&tenant_id) {
            Some(entry) => entry.lock().unwrap().clone(),
            None => return Ok(()),
        };
        let raw = serde_json::to_vec(&snapshot)
            .map_err(|e| CdnError::UsageError(format!("encode: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .await
            .map_err(|e| CdnError::UsageError(e.to_string()))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| CdnError::UsageError(e.to_string()))?;
        Ok(())
    }

    /// Ingest one request's usage for a tenant.
    ///
    /// Counters are updated and the tenant's state file rewritten before
    /// this returns; callers run it fire-and-forget through the background
    /// task registry.
    pub async fn record(&self, tenant_id: i64, origin_host: &str, bytes: u64, cache_hit: bool) {
        {
            let entry = self
                .counters
                .entry(tenant_id)
                .or_insert_with(|| Mutex::new(TenantUsage::new(tenant_id, origin_host)));
            let mut usage = entry.lock().unwrap();
            usage.origin_host = origin_host.to_string();
            usage.bandwidth_bytes += bytes;
            usage.requests += 1;
            if cache_hit {
                usage.cache_hits += 1;
            } else {
                usage.cache_misses += 1;
            }
        }
        if let Err(e) = self.persist(tenant_id).await {
            warn!(tenant_id, error = %e, "usage persistence failed");
        }
    }

    /// Current counter block for a tenant, if any.
    pub fn snapshot(&self, tenant_id: i64) -> Option<TenantUsage> {
        self.counters
            .get(&tenant_id)
            .map(|entry| entry.lock().unwrap().clone())
    }

    /// Flush all non-idle tenants to the billing store in one batch.
    ///
    /// Snapshots are taken before the write; on success exactly the
    /// snapshotted amounts are subtracted, preserving any increments that
    /// raced the write. On failure nothing is subtracted and the same
    /// amounts retry next tick. Returns the number of tenants flushed.
    pub async fn flush_once(&self) -> Result<usize> {
        let billing = self
            .billing
            .as_ref()
            .ok_or_else(|| CdnError::BillingError("no billing store bound".to_string()))?;

        let now = Utc::now();
        let hour_start = now.timestamp() / 3600 * 3600;
        let flushed_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        // Snapshot before any await
        let mut batch = Vec::new();
        for entry in self.counters.iter() {
            let usage = entry.lock().unwrap();
            if usage.is_idle() {
                continue;
            }
            batch.push(UsageFlush {
                tenant_id: usage.tenant_id,
                origin_host: usage.origin_host.clone(),
                bandwidth_bytes: usage.bandwidth_bytes,
                requests: usage.requests,
                cache_hits: usage.cache_hits,
                cache_misses: usage.cache_misses,
                hour_start,
                flushed_at: flushed_at.clone(),
            });
        }
        if batch.is_empty() {
            return Ok(0);
        }

        billing.write_batch(&batch).await?;

        // Subtract only what the write covered
        for flushed in &batch {
            if let Some(entry) = self.counters.get(&flushed.tenant_id) {
                let mut usage = entry.lock().unwrap();
                usage.bandwidth_bytes = usage.bandwidth_bytes.saturating_sub(flushed.bandwidth_bytes);
                usage.requests = usage.requests.saturating_sub(flushed.requests);
                usage.cache_hits = usage.cache_hits.saturating_sub(flushed.cache_hits);
                usage.cache_misses = usage.cache_misses.saturating_sub(flushed.cache_misses);
            }
        }
        let tenant_ids: Vec<i64> = batch.iter().map(|f| f.tenant_id).collect();
        for tenant_id in tenant_ids {
            if let Err(e) = self.persist(tenant_id).await {
                warn!(tenant_id, error = %e, "post-flush persistence failed");
            }
        }
        debug!(tenants = batch.len(), "usage flushed");
        Ok(batch.len())
    }

    /// Drop all durable state. Used when the aggregator discovers it has
    /// nowhere to flush.
    async fn clear_storage(&self) {
        self.counters.clear();
        let Some(dir) = &self.state_dir else {
            return;
        };
        let Ok(mut entries) = fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy().to_string();
            if name.starts_with("tenant_") && name.ends_with(".json") {
                let _ = fs::remove_file(entry.path()).await;
            }
        }
    }

    /// Start the periodic flush task.
    ///
    /// If no billing store is bound when the first tick fires, the
    /// instance is dead weight: durable state is cleared and the task
    /// exits so counters cannot grow without bound.
    pub fn spawn_flush_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let aggregator = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if aggregator.billing.is_none() {
                    warn!("no billing store bound; clearing usage state and stopping flushes");
                    aggregator.clear_storage().await;
                    return;
                }
                match aggregator.flush_once().await {
                    Ok(0) => {}
                    Ok(n) => debug!(tenants = n, "periodic usage flush"),
                    Err(e) => error!(error = %e, "usage flush failed, will retry"),
                }
            }
        })
    }

    /// Whether a billing store is bound.
    pub fn has_billing(&self) -> bool {
        self.billing.is_some()
    }
}
