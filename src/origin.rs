//! Streaming origin fetches with redirect re-validation and block detection
//!
//! Redirects are never delegated to the HTTP client: each hop is resolved
//! manually so the fetch-URL validator and the caller's admission gate run
//! against every URL the service is about to touch. Block detection is
//! independent of HTTP status; an origin that answers 200 with a
//! challenge page is still a blocked fetch.

use crate::error::{CdnError, Result};
use crate::request_url::validate_fetch_url;
use crate::stream_util::ByteStream;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LOCATION, REFERER, USER_AGENT};
use reqwest::redirect::Policy;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Redirect chains longer than this fail closed
const MAX_REDIRECTS: usize = 5;

/// Challenge pages are small; HTML bigger than this is a misrouted page
const CHALLENGE_PAGE_MAX_BYTES: u64 = 50_000;

/// Default Accept for media fetches
const MEDIA_ACCEPT: &str =
    "image/*, video/*, audio/*, application/vnd.apple.mpegurl, application/x-mpegurl, */*;q=0.8";

/// The client headers that may be forwarded to an origin.
///
/// Everything else from the client request, credentials and hop-by-hop
/// headers in particular, never leaves the service.
#[derive(Debug, Clone, Default)]
pub struct ForwardedHeaders {
    pub user_agent: Option<String>,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
    pub referer: Option<String>,
}

/// One origin fetch to perform
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub forward: ForwardedHeaders,
    /// Edge-provided client address, appended as X-Forwarded-For only when
    /// the deployment opts in
    pub client_ip: Option<String>,
}

/// A terminal origin response, possibly flagged as blocked
pub struct FetchedMedia {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
    /// Set when the response looks like a block or challenge rather than
    /// the requested media
    pub blocked: Option<String>,
    pub final_url: String,
}

/// Admission re-check applied to cross-host redirect targets
#[async_trait]
pub trait RedirectGate: Send + Sync {
    async fn allow(&self, host: &str) -> bool;
}

/// The fetch seam the pipeline depends on
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    async fn fetch_media(
        &self,
        request: FetchRequest,
        gate: Option<&dyn RedirectGate>,
    ) -> Result<FetchedMedia>;
}

/// Production fetcher over a reqwest client
pub struct HttpOriginFetcher {
    client: reqwest::Client,
    user_agent: String,
    forward_client_ip: bool,
}

impl HttpOriginFetcher {
    pub fn new(user_agent: String, timeout: Duration, forward_client_ip: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| CdnError::InternalError(format!("http client: {}", e)))?;
        Ok(HttpOriginFetcher {
            client,
            user_agent,
            forward_client_ip,
        })
    }

    fn outbound_headers(&self, request: &FetchRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let ua = request
            .forward
            .user_agent
            .as_deref()
            .unwrap_or(&self.user_agent);
        if let Ok(v) = HeaderValue::from_str(ua) {
            headers.insert(USER_AGENT, v);
        }
        let accept = request.forward.accept.as_deref().unwrap_or(MEDIA_ACCEPT);
        if let Ok(v) = HeaderValue::from_str(accept) {
            headers.insert(ACCEPT, v);
        }
        if let Some(lang) = &request.forward.accept_language {
            if let Ok(v) = HeaderValue::from_str(lang) {
                headers.insert(ACCEPT_LANGUAGE, v);
            }
        }
        if let Some(referer) = &request.forward.referer {
            if let Ok(v) = HeaderValue::from_str(referer) {
                headers.insert(REFERER, v);
            }
        }
        if self.forward_client_ip {
            if let Some(ip) = &request.client_ip {
                if let Ok(v) = HeaderValue::from_str(ip) {
                    headers.insert("x-forwarded-for", v);
                }
            }
        }
        headers
    }
}

fn classify_transport_error(e: reqwest::Error) -> CdnError {
    if e.is_timeout() {
        CdnError::OriginUnreachable(format!("fetch timed out: {}", e))
    } else {
        CdnError::OriginUnreachable(e.to_string())
    }
}

/// Examine a terminal response for block or challenge signals.
pub fn detect_block(
    status: u16,
    content_type: Option<&str>,
    content_length: Option<u64>,
) -> Option<String> {
    match status {
        401 | 403 => return Some(format!("http_{}", status)),
        429 => return Some("rate_limited".to_string()),
        _ => {}
    }
    let ct = content_type.unwrap_or("").to_ascii_lowercase();
    if ct.starts_with("text/html") {
        return Some(if content_length.is_some_and(|l| l < CHALLENGE_PAGE_MAX_BYTES) {
            "html_challenge_page".to_string()
        } else {
            "html_instead_of_media".to_string()
        });
    }
    if ct.starts_with("text/") {
        return Some("text_instead_of_media".to_string());
    }
    if ct.starts_with("application/json") {
        return Some("json_instead_of_media".to_string());
    }
    None
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch_media(
        &self,
        request: FetchRequest,
        gate: Option<&dyn RedirectGate>,
    ) -> Result<FetchedMedia> {
        let headers = self.outbound_headers(&request);
        let mut url = validate_fetch_url(&request.url)?;
        let initial_host = url
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or_default();

        for hop in 0..=MAX_REDIRECTS {
            debug!(url = %url, hop, "origin fetch");
            let response = self
                .client
                .get(url.clone())
                .headers(headers.clone())
                .send()
                .await
                .map_err(classify_transport_error)?;

            let status = response.status();
            if status.is_redirection() {
                if hop == MAX_REDIRECTS {
                    return Err(CdnError::OriginUnreachable(format!(
                        "redirect chain exceeded {} hops",
                        MAX_REDIRECTS
                    )));
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(CdnError::OriginRefused {
                        status: status.as_u16(),
                    })?;
                let next = url.join(location).map_err(|e| {
                    CdnError::SecurityViolation(format!("bad redirect target: {}", e))
                })?;
                let next = validate_fetch_url(next.as_str())?;
                let next_host = next
                    .host_str()
                    .map(|h| h.to_ascii_lowercase())
                    .unwrap_or_default();
                if next_host != initial_host {
                    if let Some(gate) = gate {
                        if !gate.allow(&next_host).await {
                            warn!(host = %next_host, "redirect target failed admission re-check");
                            return Err(CdnError::SecurityViolation(format!(
                                "redirect target not admitted: {}",
                                next_host
                            )));
                        }
                    }
                }
                url = next;
                continue;
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());
            let content_length = response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let blocked = detect_block(status.as_u16(), content_type.as_deref(), content_length);
            let final_url = url.to_string();
            let body: ByteStream = Box::pin(
                response
                    .bytes_stream()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
            );
            return Ok(FetchedMedia {
                status: status.as_u16(),
                content_type,
                content_length,
                body,
                blocked,
                final_url,
            });
        }
        unreachable!("redirect loop always returns")
    }
}
