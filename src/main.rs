//! mediacdn server entry point
//!
//! Loads configuration from a YAML file when a path is given on the
//! command line, otherwise from the environment, wires the components
//! together and serves until SIGINT.

use mediacdn::admission::{Admission, DomainRegistry, FileRegistry};
use mediacdn::config::CdnConfig;
use mediacdn::metrics::CdnMetrics;
use mediacdn::object_store::{FsObjectStore, MemoryObjectStore, ObjectStore};
use mediacdn::origin::HttpOriginFetcher;
use mediacdn::pipeline::RequestPipeline;
use mediacdn::server::CdnServer;
use mediacdn::tasks::BackgroundTasks;
use mediacdn::usage::{BillingStore, JsonlBillingStore, UsageAggregator};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let config = match env::args().nth(1) {
        Some(path) => {
            info!("loading configuration from {}", path);
            CdnConfig::from_file(&path)
        }
        None => CdnConfig::from_env(),
    };
    let config = match config {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!("origin mode: {:?}", config.origin_mode);
    info!("max file size: {} bytes", config.max_file_size);

    let store: Arc<dyn ObjectStore> = if config.store_dir.is_empty() {
        warn!("no store_dir configured, using in-memory object store");
        Arc::new(MemoryObjectStore::new())
    } else {
        match FsObjectStore::open(&config.store_dir).await {
            Ok(store) => {
                info!("object store at {}", config.store_dir);
                Arc::new(store)
            }
            Err(e) => {
                error!("cannot open object store: {}", e);
                std::process::exit(1);
            }
        }
    };

    let registry: Option<Arc<dyn DomainRegistry>> = if config.registry_path.is_empty() {
        None
    } else {
        match FileRegistry::open(&config.registry_path).await {
            Ok(registry) => {
                info!("domain registry at {}", config.registry_path);
                Some(Arc::new(registry))
            }
            Err(e) => {
                error!("cannot open domain registry: {}", e);
                std::process::exit(1);
            }
        }
    };

    let billing: Option<Arc<dyn BillingStore>> = if config.billing_path.is_empty() {
        None
    } else {
        info!("billing sink at {}", config.billing_path);
        Some(Arc::new(JsonlBillingStore::new(&config.billing_path)))
    };

    let usage_dir = if config.usage_dir.is_empty() {
        None
    } else {
        Some(PathBuf::from(&config.usage_dir))
    };
    let usage = match UsageAggregator::open(usage_dir, billing).await {
        Ok(usage) => usage,
        Err(e) => {
            error!("cannot open usage aggregator: {}", e);
            std::process::exit(1);
        }
    };
    let flush_task = Arc::clone(&usage)
        .spawn_flush_task(Duration::from_secs(config.usage_flush_interval_secs));

    let fetcher = match HttpOriginFetcher::new(
        config.origin_user_agent.clone(),
        Duration::from_millis(config.fetch_timeout_ms),
        config.forward_client_ip,
    ) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("cannot build origin fetcher: {}", e);
            std::process::exit(1);
        }
    };

    let admission = Arc::new(Admission::from_config(&config, registry));
    let metrics = Arc::new(CdnMetrics::new());
    let tasks = BackgroundTasks::new();

    let pipeline = Arc::new(RequestPipeline::new(
        Arc::clone(&config),
        store,
        admission,
        fetcher,
        Arc::clone(&usage),
        Arc::clone(&metrics),
        tasks.clone(),
    ));

    let listener = match TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    let server = Arc::new(CdnServer::new(pipeline, metrics, Arc::clone(&usage), tasks));
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if let Err(e) = server.serve(listener, shutdown).await {
        error!("server error: {}", e);
    }
    flush_task.abort();
}
