//! The request pipeline: orchestrates validation, admission, cache lookup,
//! origin fetch, streaming and usage accounting
//!
//! The failure policy is absolute: any error that is not an unparseable
//! URL or an invalid range on a cached object becomes a 302 back to the
//! origin URL. The service never surfaces a 5xx to an end user.

use crate::admission::Admission;
use crate::config::CdnConfig;
use crate::error::{CdnError, Result};
use crate::media_type;
use crate::metrics::CdnMetrics;
use crate::models::{AdmissionResult, ObjectMetadata, RangeSpec};
use crate::object_store::{ObjectInfo, ObjectStore, StoredObject};
use crate::origin::{FetchRequest, ForwardedHeaders, OriginFetcher, RedirectGate};
use crate::request_url::{parse_request, RequestTarget};
use crate::stream_util::{self, ByteStream, DeliveryReceipt};
use crate::tasks::BackgroundTasks;
use crate::usage::UsageAggregator;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use futures_util::TryStreamExt;
use http::{header, Method, Request, Response, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use std::sync::Arc;
use tracing::{debug, warn};

/// Response body type produced by the pipeline
pub type ResponseBody = BoxBody<Bytes, std::io::Error>;

pub const HDR_STATUS: &str = "x-mediacdn-status";
pub const HDR_CACHED_AT: &str = "x-mediacdn-cached-at";
pub const HDR_BLOCK_REASON: &str = "x-mediacdn-block-reason";

const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";
const CACHE_CONTROL_NO_STORE: &str = "no-store, no-cache, must-revalidate";

/// Chunks buffered per tee branch before backpressure kicks in
const TEE_BUFFER_CHUNKS: usize = 16;

pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

pub fn empty_body() -> ResponseBody {
    full_body(Bytes::new())
}

fn stream_body(stream: ByteStream) -> ResponseBody {
    StreamBody::new(stream.map_ok(Frame::data)).boxed()
}

/// Outcome of the parallel cache dispatch
enum CacheLookup {
    Miss,
    /// Metadata only; a body read was deferred
    Head(ObjectInfo),
    /// Full object with body
    Full(StoredObject),
}

impl CacheLookup {
    fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }
}

/// Admission re-check for redirect targets on the fetch path
struct AdmissionGate {
    admission: Arc<Admission>,
}

#[async_trait]
impl RedirectGate for AdmissionGate {
    async fn allow(&self, host: &str) -> bool {
        self.admission.validate(host).await.allowed
    }
}

/// The request pipeline and its collaborators
pub struct RequestPipeline {
    config: Arc<CdnConfig>,
    store: Arc<dyn ObjectStore>,
    admission: Arc<Admission>,
    fetcher: Arc<dyn OriginFetcher>,
    usage: Arc<UsageAggregator>,
    metrics: Arc<CdnMetrics>,
    tasks: BackgroundTasks,
}

impl RequestPipeline {
    pub fn new(
        config: Arc<CdnConfig>,
        store: Arc<dyn ObjectStore>,
        admission: Arc<Admission>,
        fetcher: Arc<dyn OriginFetcher>,
        usage: Arc<UsageAggregator>,
        metrics: Arc<CdnMetrics>,
        tasks: BackgroundTasks,
    ) -> Self {
        RequestPipeline {
            config,
            store,
            admission,
            fetcher,
            usage,
            metrics,
            tasks,
        }
    }

    /// Handle one proxied-media request. Never returns a 5xx.
    pub async fn handle<B>(&self, req: Request<B>, client_ip: Option<String>) -> Response<ResponseBody> {
        self.metrics.record_request();
        let (parts, _body) = req.into_parts();
        let result = match parts.method {
            Method::GET => self.handle_get(&parts, client_ip).await,
            Method::HEAD => self.handle_head(&parts).await,
            _ => Ok(method_not_allowed()),
        };
        match result {
            Ok(response) => response,
            Err(err) => self.error_floor(&parts.uri, err),
        }
    }

    /// The catch block under everything: re-derive the source URL and
    /// redirect. Only a URL that cannot be re-parsed yields a 400.
    fn error_floor(&self, uri: &Uri, err: CdnError) -> Response<ResponseBody> {
        if err.redirects_to_origin() {
            if let Some(source_url) = crate::request_url::fallback_source_url(uri) {
                warn!(uri = %uri, error = %err, "pipeline error, falling back to origin");
                return self.redirect(&source_url, err.block_reason());
            }
        }
        debug!(uri = %uri, error = %err, "unserviceable request");
        Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(header::CACHE_CONTROL, CACHE_CONTROL_NO_STORE)
            .body(full_body("invalid request"))
            .unwrap()
    }

    fn redirect(&self, location: &str, block_reason: Option<&str>) -> Response<ResponseBody> {
        self.metrics.record_redirect();
        let mut builder = Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, location)
            .header(header::CACHE_CONTROL, CACHE_CONTROL_NO_STORE)
            .header(HDR_STATUS, "redirect");
        if let Some(reason) = block_reason {
            builder = builder.header(HDR_BLOCK_REASON, reason);
        }
        builder.body(empty_body()).unwrap()
    }

    async fn handle_head(&self, parts: &http::request::Parts) -> Result<Response<ResponseBody>> {
        let target = parse_request(&parts.uri)?;
        let admission = self.admission.validate(&target.host).await;
        if !admission.allowed {
            return Ok(self.redirect(&target.source_url, None));
        }
        // Metadata-only requests never warm the cache
        if target.force_refresh {
            return Ok(self.redirect(&target.source_url, None));
        }
        let info = match self.store.head(&target.cache_key).await {
            Ok(info) => info,
            Err(e) if e.degrades_to_miss() => {
                warn!(key = %target.cache_key, error = %e, "head lookup degraded to miss");
                None
            }
            Err(e) => return Err(e),
        };
        match info {
            Some(info) => {
                if !media_type::is_media(&info.content_type) {
                    self.schedule_poison_delete(&target.cache_key);
                    return Ok(self.redirect(&target.source_url, None));
                }
                self.metrics.record_cache_hit();
                Ok(self
                    .hit_builder(&info)
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, info.size)
                    .body(empty_body())
                    .unwrap())
            }
            None => {
                self.metrics.record_cache_miss();
                Ok(self.redirect(&target.source_url, None))
            }
        }
    }

    async fn handle_get(
        &self,
        parts: &http::request::Parts,
        client_ip: Option<String>,
    ) -> Result<Response<ResponseBody>> {
        let target = parse_request(&parts.uri)?;
        let range_header: Option<String> = parts
            .headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());

        // head() suffices when the body read can be deferred to the range
        // path; the full-file probe still wants the whole body
        let metadata_only = range_header
            .as_deref()
            .is_some_and(|h| h != "bytes=0-");
        let speculative = range_header.as_deref().and_then(parse_bounded_range);

        let (admission, lookup, prefetch) = tokio::join!(
            self.admission.validate(&target.host),
            self.lookup_cache(&target, metadata_only),
            self.prefetch_range(&target, speculative),
        );

        if !admission.allowed {
            debug!(host = %target.host, "admission denied");
            return Ok(self.redirect(&target.source_url, None));
        }

        if target.view && self.config.debug {
            return Ok(self.debug_view(&target, &lookup));
        }

        if lookup.is_miss() {
            self.serve_miss(&target, parts, &admission, range_header.as_deref(), client_ip)
                .await
        } else {
            self.serve_hit(&target, parts, &admission, lookup, prefetch, speculative)
                .await
        }
    }

    async fn lookup_cache(&self, target: &RequestTarget, metadata_only: bool) -> CacheLookup {
        if target.force_refresh {
            return CacheLookup::Miss;
        }
        if metadata_only {
            match self.store.head(&target.cache_key).await {
                Ok(Some(info)) => CacheLookup::Head(info),
                Ok(None) => CacheLookup::Miss,
                Err(e) => {
                    warn!(key = %target.cache_key, error = %e, "cache head failed, treating as miss");
                    CacheLookup::Miss
                }
            }
        } else {
            match self.store.get(&target.cache_key).await {
                Ok(Some(object)) => CacheLookup::Full(object),
                Ok(None) => CacheLookup::Miss,
                Err(e) => {
                    warn!(key = %target.cache_key, error = %e, "cache get failed, treating as miss");
                    CacheLookup::Miss
                }
            }
        }
    }

    /// Speculative ranged read launched alongside the metadata lookup.
    /// Discarded unless the hit path can adopt it; saves one store
    /// round-trip when it can.
    async fn prefetch_range(
        &self,
        target: &RequestTarget,
        speculative: Option<(u64, u64)>,
    ) -> Option<StoredObject> {
        let (start, end) = speculative?;
        if target.force_refresh {
            return None;
        }
        match self
            .store
            .get_range(&target.cache_key, start, end - start + 1)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                debug!(key = %target.cache_key, error = %e, "range prefetch failed");
                None
            }
        }
    }

    async fn serve_hit(
        &self,
        target: &RequestTarget,
        parts: &http::request::Parts,
        admission: &AdmissionResult,
        lookup: CacheLookup,
        prefetch: Option<StoredObject>,
        speculative: Option<(u64, u64)>,
    ) -> Result<Response<ResponseBody>> {
        let (info, body) = match lookup {
            CacheLookup::Full(object) => (object.info, Some(object.body)),
            CacheLookup::Head(info) => (info, None),
            CacheLookup::Miss => unreachable!("miss handled by caller"),
        };

        // Poisoned entry: wrong content-type in the store. Delete lazily
        // and let the origin answer.
        if !media_type::is_media(&info.content_type) {
            self.schedule_poison_delete(&target.cache_key);
            return Ok(self.redirect(&target.source_url, None));
        }
        self.metrics.record_cache_hit();

        if let Some(client_etag) = parts
            .headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
        {
            if client_etag.trim() == info.etag {
                self.metrics.record_not_modified();
                self.record_usage_now(admission, &target.host, 0, true);
                return Ok(self
                    .hit_builder(&info)
                    .status(StatusCode::NOT_MODIFIED)
                    .body(empty_body())
                    .unwrap());
            }
        }

        let range_header = parts
            .headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok());

        let range = match range_header {
            Some(h) => match RangeSpec::parse(h, info.size) {
                Some(range) => Some(range),
                None => {
                    return Ok(Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{}", info.size))
                        .header(HDR_STATUS, "hit")
                        .body(empty_body())
                        .unwrap());
                }
            },
            None => None,
        };

        match range {
            Some(range) if range.is_partial => {
                let body = self
                    .ranged_hit_body(target, &info, range, prefetch, speculative)
                    .await?;
                let (counted, receipt) = stream_util::counting(body);
                self.record_usage_after(receipt, admission, &target.host, true);
                self.metrics.record_range_response();
                Ok(self
                    .hit_builder(&info)
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_LENGTH, range.length)
                    .header(header::CONTENT_RANGE, range.content_range(info.size))
                    .body(stream_body(counted))
                    .unwrap())
            }
            maybe_full => {
                // Full body: either no Range header, or one that covers
                // the whole object (which still earns a 206)
                let body = match body {
                    Some(body) => body,
                    None => {
                        self.full_hit_body(target, &info, prefetch, speculative)
                            .await?
                    }
                };
                let (counted, receipt) = stream_util::counting(body);
                self.record_usage_after(receipt, admission, &target.host, true);
                let mut builder = self
                    .hit_builder(&info)
                    .header(header::CONTENT_LENGTH, info.size);
                if let Some(range) = maybe_full {
                    self.metrics.record_range_response();
                    builder = builder
                        .status(StatusCode::PARTIAL_CONTENT)
                        .header(header::CONTENT_RANGE, range.content_range(info.size));
                } else {
                    builder = builder.status(StatusCode::OK);
                }
                Ok(builder.body(stream_body(counted)).unwrap())
            }
        }
    }

    /// Body for a partial hit: adopt the speculative prefetch when it
    /// covers exactly the requested interval of the same object version.
    async fn ranged_hit_body(
        &self,
        target: &RequestTarget,
        info: &ObjectInfo,
        range: RangeSpec,
        prefetch: Option<StoredObject>,
        speculative: Option<(u64, u64)>,
    ) -> Result<ByteStream> {
        if let (Some(prefetched), Some((start, _))) = (prefetch, speculative) {
            if prefetched.info.etag == info.etag && start == range.start {
                return Ok(prefetched.body);
            }
        }
        match self
            .store
            .get_range(&target.cache_key, range.start, range.length)
            .await
        {
            Ok(Some(object)) => Ok(object.body),
            Ok(None) => Err(CdnError::StoreError(format!(
                "object vanished during ranged read: {}",
                target.cache_key
            ))),
            Err(e) => Err(e),
        }
    }

    /// Body for a whole-object hit reached via the head-only lookup path.
    async fn full_hit_body(
        &self,
        target: &RequestTarget,
        info: &ObjectInfo,
        prefetch: Option<StoredObject>,
        speculative: Option<(u64, u64)>,
    ) -> Result<ByteStream> {
        if let (Some(prefetched), Some((start, end))) = (prefetch, speculative) {
            if prefetched.info.etag == info.etag && start == 0 && end + 1 >= info.size {
                return Ok(prefetched.body);
            }
        }
        match self.store.get(&target.cache_key).await {
            Ok(Some(object)) => Ok(object.body),
            Ok(None) => Err(CdnError::StoreError(format!(
                "object vanished during read: {}",
                target.cache_key
            ))),
            Err(e) => Err(e),
        }
    }

    async fn serve_miss(
        &self,
        target: &RequestTarget,
        parts: &http::request::Parts,
        admission: &AdmissionResult,
        range_header: Option<&str>,
        client_ip: Option<String>,
    ) -> Result<Response<ResponseBody>> {
        // A partial range on a cold cache cannot be served without lying
        // about Content-Range; send the player to the origin.
        if range_header.is_some_and(|h| h != "bytes=0-") {
            debug!(key = %target.cache_key, "partial range on cache miss");
            return Ok(self.redirect(&target.source_url, None));
        }

        let gate = AdmissionGate {
            admission: Arc::clone(&self.admission),
        };
        let fetched = self
            .fetcher
            .fetch_media(
                FetchRequest {
                    url: target.source_url.clone(),
                    forward: extract_forwarded(&parts.headers),
                    client_ip,
                },
                Some(&gate),
            )
            .await?;

        if let Some(reason) = &fetched.blocked {
            warn!(url = %target.source_url, reason = %reason, "origin blocked the fetch");
            return Ok(self.redirect(&target.source_url, Some(reason)));
        }
        if !(200..300).contains(&fetched.status) {
            debug!(url = %target.source_url, status = fetched.status, "origin refused");
            return Ok(self.redirect(&target.source_url, None));
        }
        let content_type = match &fetched.content_type {
            Some(ct) if media_type::is_media(ct) => ct.clone(),
            other => {
                debug!(url = %target.source_url, content_type = ?other, "origin returned non-media");
                return Ok(self.redirect(&target.source_url, None));
            }
        };
        if let Some(length) = fetched.content_length {
            if length > self.config.max_file_size {
                debug!(url = %target.source_url, length, "origin object over size cap");
                return Ok(self.redirect(&target.source_url, None));
            }
        }
        self.metrics.record_cache_miss();

        let (limited, receipt) = stream_util::limited(fetched.body, self.config.max_file_size);
        self.record_origin_usage(receipt, admission, &target.host);

        let client_stream = match fetched.content_length {
            Some(length) => {
                let (client_branch, store_branch, driver) =
                    stream_util::tee(limited, TEE_BUFFER_CHUNKS);
                self.tasks.spawn(driver);
                self.schedule_cache_write(target, store_branch, length, &content_type);
                client_branch
            }
            None => {
                // Chunked origin body: stream to the client, skip the cache
                self.metrics.record_uncacheable_no_length();
                debug!(key = %target.cache_key, "no content-length, skipping cache write");
                limited
            }
        };

        let mut builder = Response::builder()
            .header(header::CONTENT_TYPE, content_type.as_str())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE)
            .header(HDR_STATUS, "miss");
        if let Some(length) = fetched.content_length {
            builder = builder.header(header::CONTENT_LENGTH, length);
        }
        // A range probe earns a 206 so players detect range support
        match (range_header, fetched.content_length) {
            (Some(_), Some(length)) if length > 0 => {
                self.metrics.record_range_response();
                builder = builder.status(StatusCode::PARTIAL_CONTENT).header(
                    header::CONTENT_RANGE,
                    format!("bytes 0-{}/{}", length - 1, length),
                );
            }
            _ => {
                builder = builder.status(StatusCode::OK);
            }
        }
        Ok(builder.body(stream_body(client_stream)).unwrap())
    }

    fn hit_builder(&self, info: &ObjectInfo) -> http::response::Builder {
        Response::builder()
            .header(header::CONTENT_TYPE, info.content_type.as_str())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE)
            .header(header::ETAG, info.etag.as_str())
            .header(header::LAST_MODIFIED, httpdate::fmt_http_date(info.uploaded))
            .header(HDR_STATUS, "hit")
            .header(HDR_CACHED_AT, info.metadata.cached_at.as_str())
    }

    fn debug_view(&self, target: &RequestTarget, lookup: &CacheLookup) -> Response<ResponseBody> {
        let status = if lookup.is_miss() { "miss" } else { "hit" };
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(header::CACHE_CONTROL, CACHE_CONTROL_NO_STORE)
            .header(HDR_STATUS, status)
            .body(full_body(format!(
                "{} {}\n",
                status, target.cache_key
            )))
            .unwrap()
    }

    fn schedule_poison_delete(&self, key: &str) {
        self.metrics.record_poisoned_delete();
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let key = key.to_string();
        warn!(key = %key, "poisoned cache entry, scheduling delete");
        self.tasks.spawn(async move {
            if let Err(e) = store.delete(&key).await {
                warn!(key = %key, error = %e, "poisoned entry delete failed");
                metrics.record_cache_write_failure();
            }
        });
    }

    fn schedule_cache_write(
        &self,
        target: &RequestTarget,
        body: ByteStream,
        size: u64,
        content_type: &str,
    ) {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let key = target.cache_key.clone();
        let metadata = ObjectMetadata {
            source_url: target.source_url.clone(),
            origin_host: target.host.clone(),
            cached_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            content_length: Some(size),
        };
        let content_type = content_type.to_string();
        self.tasks.spawn(async move {
            match store.put(&key, body, size, &content_type, metadata).await {
                Ok(()) => debug!(key = %key, size, "cache write complete"),
                Err(e) => {
                    // The client already has its bytes; a dropped write
                    // just means the next request is a miss
                    warn!(key = %key, error = %e, "cache write failed");
                    metrics.record_cache_write_failure();
                }
            }
        });
    }

    /// Record usage once a metered stream settles.
    fn record_usage_after(
        &self,
        receipt: DeliveryReceipt,
        admission: &AdmissionResult,
        host: &str,
        cache_hit: bool,
    ) {
        let tenants: Vec<i64> = admission.active_tenants().collect();
        let usage = Arc::clone(&self.usage);
        let metrics = Arc::clone(&self.metrics);
        let host = host.to_string();
        self.tasks.spawn(async move {
            let bytes = receipt.outcome().await.bytes();
            metrics.record_bytes_to_client(bytes);
            for tenant in &tenants {
                usage.record(*tenant, &host, bytes, cache_hit).await;
            }
        });
    }

    /// Miss-path variant: the metered stream sits on the origin side of
    /// the tee, so the count also feeds the origin-bytes metric.
    fn record_origin_usage(
        &self,
        receipt: DeliveryReceipt,
        admission: &AdmissionResult,
        host: &str,
    ) {
        let tenants: Vec<i64> = admission.active_tenants().collect();
        let usage = Arc::clone(&self.usage);
        let metrics = Arc::clone(&self.metrics);
        let host = host.to_string();
        self.tasks.spawn(async move {
            let bytes = receipt.outcome().await.bytes();
            metrics.record_bytes_from_origin(bytes);
            metrics.record_bytes_to_client(bytes);
            for tenant in &tenants {
                usage.record(*tenant, &host, bytes, false).await;
            }
        });
    }

    /// Immediate usage record, for responses with no body (304).
    fn record_usage_now(&self, admission: &AdmissionResult, host: &str, bytes: u64, cache_hit: bool) {
        let tenants: Vec<i64> = admission.active_tenants().collect();
        let usage = Arc::clone(&self.usage);
        let host = host.to_string();
        self.tasks.spawn(async move {
            for tenant in &tenants {
                usage.record(*tenant, &host, bytes, cache_hit).await;
            }
        });
    }
}

fn method_not_allowed() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(header::ALLOW, "GET, HEAD, OPTIONS")
        .body(empty_body())
        .unwrap()
}

/// Strictly parse `bytes=A-B` with `A <= B`, the only form worth a
/// speculative ranged read.
fn parse_bounded_range(header: &str) -> Option<(u64, u64)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if start <= end {
        Some((start, end))
    } else {
        None
    }
}

/// Pull the forwardable subset of client headers. Credentials and
/// hop-by-hop headers never make the list.
fn extract_forwarded(headers: &http::HeaderMap) -> ForwardedHeaders {
    let get = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    ForwardedHeaders {
        user_agent: get(header::USER_AGENT),
        accept: get(header::ACCEPT),
        accept_language: get(header::ACCEPT_LANGUAGE),
        referer: get(header::REFERER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bounded_range() {
        assert_eq!(parse_bounded_range("bytes=0-99"), Some((0, 99)));
        assert_eq!(parse_bounded_range("bytes=100-100"), Some((100, 100)));
        assert_eq!(parse_bounded_range("bytes=0-"), None);
        assert_eq!(parse_bounded_range("bytes=-100"), None);
        assert_eq!(parse_bounded_range("bytes=9-1"), None);
        assert_eq!(parse_bounded_range("bytes=0-10,20-30"), None);
        assert_eq!(parse_bounded_range("chunks=0-10"), None);
    }

    #[test]
    fn test_extract_forwarded_ignores_credentials() {
        let mut headers = http::HeaderMap::new();
        headers.insert(header::USER_AGENT, "player/2.0".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer sekrit".parse().unwrap());
        headers.insert(header::COOKIE, "session=1".parse().unwrap());
        headers.insert(header::ACCEPT, "video/*".parse().unwrap());

        let forwarded = extract_forwarded(&headers);
        assert_eq!(forwarded.user_agent.as_deref(), Some("player/2.0"));
        assert_eq!(forwarded.accept.as_deref(), Some("video/*"));
        assert!(forwarded.referer.is_none());
    }
}
