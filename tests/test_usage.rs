// Aggregator properties: flushed amounts plus live counters always equal
// what was recorded, no matter how records and flushes interleave.

use async_trait::async_trait;
use mediacdn::error::CdnError;
use mediacdn::usage::{BillingStore, UsageAggregator, UsageFlush};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryBilling {
    rows: Mutex<Vec<UsageFlush>>,
    fail: AtomicBool,
}

impl MemoryBilling {
    async fn billed_bytes(&self, tenant_id: i64) -> u64 {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|f| f.tenant_id == tenant_id)
            .map(|f| f.bandwidth_bytes)
            .sum()
    }

    async fn billed_requests(&self, tenant_id: i64) -> u64 {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|f| f.tenant_id == tenant_id)
            .map(|f| f.requests)
            .sum()
    }
}

#[async_trait]
impl BillingStore for MemoryBilling {
    async fn write_batch(&self, batch: &[UsageFlush]) -> mediacdn::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CdnError::BillingError("injected outage".into()));
        }
        self.rows.lock().await.extend_from_slice(batch);
        Ok(())
    }
}

// After N successful flushes, billed totals plus in-memory counters equal
// the bytes observed by record calls.
#[tokio::test]
async fn test_conservation_across_flushes() {
    let billing = Arc::new(MemoryBilling::default());
    let aggregator = UsageAggregator::open(None, Some(billing.clone()))
        .await
        .unwrap();

    let mut recorded: u64 = 0;
    for round in 0u64..5 {
        for i in 0u64..10 {
            let bytes = 100 * (round + 1) + i;
            aggregator.record(7, "example.com", bytes, i % 2 == 0).await;
            recorded += bytes;
        }
        aggregator.flush_once().await.unwrap();
    }
    // A final batch left unflushed on purpose
    aggregator.record(7, "example.com", 999, false).await;
    recorded += 999;

    let billed = billing.billed_bytes(7).await;
    let live = aggregator.snapshot(7).unwrap().bandwidth_bytes;
    assert_eq!(billed + live, recorded);
    assert_eq!(live, 999);
}

// Records racing flushes lose nothing and double-count nothing.
#[tokio::test]
async fn test_record_flush_interleaving() {
    let billing = Arc::new(MemoryBilling::default());
    let aggregator = UsageAggregator::open(None, Some(billing.clone()))
        .await
        .unwrap();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                for i in 0..250u64 {
                    aggregator
                        .record(1, "example.com", 10, (w + i) % 2 == 0)
                        .await;
                }
            })
        })
        .collect();

    let flusher = {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            for _ in 0..20 {
                let _ = aggregator.flush_once().await;
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    flusher.await.unwrap();
    aggregator.flush_once().await.unwrap();

    assert_eq!(billing.billed_bytes(1).await, 4 * 250 * 10);
    assert_eq!(billing.billed_requests(1).await, 1000);
    let remaining = aggregator.snapshot(1).unwrap();
    assert_eq!(remaining.bandwidth_bytes, 0);
    assert_eq!(remaining.requests, 0);
}

// A billing outage keeps the counters intact for the next tick.
#[tokio::test]
async fn test_outage_then_recovery_bills_once() {
    let billing = Arc::new(MemoryBilling::default());
    let aggregator = UsageAggregator::open(None, Some(billing.clone()))
        .await
        .unwrap();

    aggregator.record(5, "example.com", 4096, false).await;

    billing.fail.store(true, Ordering::SeqCst);
    assert!(aggregator.flush_once().await.is_err());
    assert!(aggregator.flush_once().await.is_err());
    assert_eq!(aggregator.snapshot(5).unwrap().bandwidth_bytes, 4096);

    billing.fail.store(false, Ordering::SeqCst);
    aggregator.flush_once().await.unwrap();
    assert_eq!(billing.billed_bytes(5).await, 4096);
    assert_eq!(aggregator.snapshot(5).unwrap().bandwidth_bytes, 0);

    // Nothing left to double-bill
    aggregator.flush_once().await.unwrap();
    assert_eq!(billing.billed_bytes(5).await, 4096);
}

// Counters survive a restart via the state directory and keep flushing.
#[tokio::test]
async fn test_durable_counters_flush_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let billing = Arc::new(MemoryBilling::default());

    {
        let aggregator = UsageAggregator::open(Some(dir.path().to_path_buf()), None)
            .await
            .unwrap();
        aggregator.record(9, "example.com", 1234, true).await;
        aggregator.record(9, "example.com", 766, false).await;
    }

    let reopened = UsageAggregator::open(
        Some(dir.path().to_path_buf()),
        Some(billing.clone() as Arc<dyn BillingStore>),
    )
    .await
    .unwrap();
    reopened.flush_once().await.unwrap();

    assert_eq!(billing.billed_bytes(9).await, 2000);
    assert_eq!(billing.billed_requests(9).await, 2);
    assert_eq!(reopened.snapshot(9).unwrap().bandwidth_bytes, 0);
}

// Hour buckets are well-formed on every flushed row.
#[tokio::test]
async fn test_flush_rows_carry_hour_bucket() {
    let billing = Arc::new(MemoryBilling::default());
    let aggregator = UsageAggregator::open(None, Some(billing.clone()))
        .await
        .unwrap();
    aggregator.record(2, "example.com", 50, true).await;
    aggregator.flush_once().await.unwrap();

    let rows = billing.rows.lock().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hour_start % 3600, 0);
    assert!(!rows[0].flushed_at.is_empty());
    assert_eq!(rows[0].origin_host, "example.com");
}
