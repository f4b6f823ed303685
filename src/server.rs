//! HTTP server: accept loop, routing and graceful shutdown
//!
//! Routing is deliberately small: the operational endpoints (`/health`,
//! `/ping`, `/stats`), the CORS preflight answer, and everything else
//! goes to the request pipeline. On shutdown the listener stops first,
//! then the background-task registry drains so promised cache writes and
//! usage records complete, then usage gets one final flush.

use crate::metrics::CdnMetrics;
use crate::pipeline::{empty_body, full_body, RequestPipeline, ResponseBody};
use crate::tasks::BackgroundTasks;
use crate::usage::UsageAggregator;
use chrono::{SecondsFormat, Utc};
use http::{header, Method, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared server state handed to every connection
pub struct CdnServer {
    pipeline: Arc<RequestPipeline>,
    metrics: Arc<CdnMetrics>,
    usage: Arc<UsageAggregator>,
    tasks: BackgroundTasks,
}

impl CdnServer {
    pub fn new(
        pipeline: Arc<RequestPipeline>,
        metrics: Arc<CdnMetrics>,
        usage: Arc<UsageAggregator>,
        tasks: BackgroundTasks,
    ) -> Self {
        CdnServer {
            pipeline,
            metrics,
            usage,
            tasks,
        }
    }

    /// Accept connections until `shutdown` resolves, then drain.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> std::io::Result<()> {
        info!("listening on http://{}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = accepted?;
                    let io = TokioIo::new(stream);
                    let server = Arc::clone(&self);
                    tokio::task::spawn(async move {
                        let service = service_fn(move |req| {
                            let server = Arc::clone(&server);
                            async move { server.route(req, remote).await }
                        });
                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            error!("error serving connection: {:?}", err);
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("shutdown requested, draining background work");
                    break;
                }
            }
        }

        self.tasks.drain().await;
        if self.usage.has_billing() {
            if let Err(e) = self.usage.flush_once().await {
                error!(error = %e, "final usage flush failed");
            }
        }
        info!("drained, exiting");
        Ok(())
    }

    async fn route(
        &self,
        req: Request<hyper::body::Incoming>,
        remote: SocketAddr,
    ) -> Result<Response<ResponseBody>, Infallible> {
        let response = match (req.method(), req.uri().path()) {
            (&Method::OPTIONS, _) => preflight_response(),
            (&Method::GET, "/health") | (&Method::GET, "/ping") => health_response(),
            (&Method::GET, "/stats") => self.stats_response(),
            _ => {
                self.pipeline
                    .handle(req, Some(remote.ip().to_string()))
                    .await
            }
        };
        Ok(response)
    }

    fn stats_response(&self) -> Response<ResponseBody> {
        let body = serde_json::to_string(&self.metrics.snapshot())
            .unwrap_or_else(|_| "{}".to_string());
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(full_body(body))
            .unwrap()
    }
}

fn health_response() -> Response<ResponseBody> {
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full_body(body.to_string()))
        .unwrap()
}

fn preflight_response() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET, HEAD, OPTIONS")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Range, If-None-Match")
        .header(header::ACCESS_CONTROL_MAX_AGE, "86400")
        .body(empty_body())
        .unwrap()
}
