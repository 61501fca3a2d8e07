//! Buffered reverse-proxy path to the local backend

use crate::rewrite::{PublicOrigin, rewrite_location};
use crate::route::RouteMatch;
use crate::{BackendConfig, BoxError, GatewayBody};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{CONTENT_LENGTH, HOST, LOCATION};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Limited, StreamBody};
use hyper::body::{Body, Frame};
use reqwest::Client;
use sidecar_common::strip_hop_by_hop;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::debug;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Backend(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Everything the proxy needs that does not change per request
pub struct ProxyContext<'a> {
    pub client: &'a Client,
    pub backend: &'a BackendConfig,
    pub origin: &'a PublicOrigin,
    pub max_body_bytes: usize,
}

/// Forward a request to the backend under `route.path`
pub async fn forward<B>(
    ctx: &ProxyContext<'_>,
    req: Request<B>,
    route: &RouteMatch,
    peer: SocketAddr,
) -> Result<Response<GatewayBody>, ProxyError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > ctx.max_body_bytes) {
        return Err(ProxyError::PayloadTooLarge(ctx.max_body_bytes));
    }

    let body = Limited::new(body, ctx.max_body_bytes)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                ProxyError::PayloadTooLarge(ctx.max_body_bytes)
            } else {
                ProxyError::RequestBody(e.to_string())
            }
        })?
        .to_bytes();

    let mut headers = parts.headers;
    let original_host = headers.remove(HOST);
    strip_hop_by_hop(&mut headers);
    add_forwarded_headers(&mut headers, original_host, peer);

    let url = match parts.uri.query() {
        Some(query) => format!("{}{}?{}", ctx.backend.base_url(), route.path, query),
        None => format!("{}{}", ctx.backend.base_url(), route.path),
    };
    debug!(method = %parts.method, "Proxying to {}", url);

    let upstream = ctx
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    rewrite_location_header(&mut headers, route, ctx);

    let stream = upstream
        .bytes_stream()
        .map_ok(Frame::data)
        .map_err(|e| Box::new(e) as BoxError);

    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn add_forwarded_headers(headers: &mut HeaderMap, host: Option<HeaderValue>, peer: SocketAddr) {
    let forwarded_for = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, peer.ip()),
        None => peer.ip().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}

fn rewrite_location_header(headers: &mut HeaderMap, route: &RouteMatch, ctx: &ProxyContext<'_>) {
    let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };

    let backend = ctx.backend.addr.to_string();
    if let Some(rewritten) =
        rewrite_location(location, &route.path, &route.prefix(), &backend, ctx.origin)
    {
        debug!("Rewriting Location {} -> {}", location, rewritten);
        if let Ok(value) = HeaderValue::from_str(&rewritten) {
            headers.insert(LOCATION, value);
        }
    }
}

/// Plain response for a proxy failure
pub fn error_body(e: &ProxyError) -> Response<GatewayBody> {
    let status = e.status();
    let mut response = crate::error_handling::status_response(status);
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        // The rest of the body is left unread
        response
            .headers_mut()
            .insert(http::header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}
