//! Protocol-upgrade path: take over the client connection, replay the
//! request to the backend and splice the two streams.
//!
//! hyper has already consumed the client's request head, so it is rebuilt
//! with the backend path and sent over a dedicated HTTP/1 client connection.
//! A `101` answer upgrades both sides; anything else is relayed as an
//! ordinary response.

use crate::error_handling::full_body;
use crate::{BackendConfig, BoxError, GatewayBody};
use bytes::Bytes;
use http::header::{HOST, SET_COOKIE};
use http::{HeaderValue, Request, Response, StatusCode, Version};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use sidecar_common::constants::MAX_RESPONSE_HEAD_BYTES;
use sidecar_common::{Result, SidecarError, splice, strip_hop_by_hop};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Relay an upgrade request to the backend
///
/// Returns the response for the client. On `101` the splice runs in a
/// background task once both sides complete the upgrade.
pub async fn upgrade<B>(
    mut req: Request<B>,
    backend_path: &str,
    backend: &BackendConfig,
    session_cookie: HeaderValue,
) -> Result<Response<GatewayBody>>
where
    B: Send,
{
    let client_upgrade = req
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or_else(|| SidecarError::Upgrade("connection cannot be taken over".to_string()))?;

    let backend_req = backend_request(&req, backend_path)?;
    drop(req);

    let mut backend_res = send_to_backend(backend, backend_req).await?;
    if backend_res.status() != StatusCode::SWITCHING_PROTOCOLS {
        debug!("Backend declined upgrade with {}", backend_res.status());
        return Ok(declined_response(backend_res, session_cookie));
    }

    let backend_upgrade = hyper::upgrade::on(&mut backend_res);
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.headers_mut() = backend_res.headers().clone();
    response.headers_mut().append(SET_COOKIE, session_cookie);

    let path = backend_path.to_string();
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(path = %path, "Upgrade failed: {}", e);
                return;
            }
        };

        info!(path = %path, "Upgraded connection spliced to backend");
        match splice(TokioIo::new(client), TokioIo::new(upstream)).await {
            Ok((up, down)) => {
                debug!(path = %path, "Upgraded connection closed ({} bytes up, {} bytes down)", up, down)
            }
            Err(e) => debug!(path = %path, "Upgraded connection ended: {}", e),
        }
    });

    Ok(response)
}

/// Rebuild the client's request line and headers for the backend
pub fn backend_request<B>(req: &Request<B>, backend_path: &str) -> Result<Request<Empty<Bytes>>> {
    let target = match req.uri().query() {
        Some(query) => format!("{}?{}", backend_path, query),
        None => backend_path.to_string(),
    };

    let mut out = Request::builder()
        .method(req.method().clone())
        .uri(target)
        .version(Version::HTTP_11)
        .body(Empty::new())
        .map_err(|e| SidecarError::Upgrade(format!("bad backend request: {}", e)))?;

    *out.headers_mut() = req.headers().clone();
    if !out.headers().contains_key(HOST) {
        if let Some(value) = req
            .uri()
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
        {
            out.headers_mut().insert(HOST, value);
        }
    }
    Ok(out)
}

/// Send `req` over a fresh connection to the backend
///
/// The connection task keeps running so the response body can be streamed
/// or the connection upgraded.
pub async fn send_to_backend(
    backend: &BackendConfig,
    req: Request<Empty<Bytes>>,
) -> Result<Response<Incoming>> {
    let stream = TcpStream::connect(backend.addr)
        .await
        .map_err(|e| SidecarError::dial(backend.addr, e))?;

    let (mut sender, conn) = http1::Builder::new()
        .max_buf_size(MAX_RESPONSE_HEAD_BYTES)
        .handshake(TokioIo::new(stream))
        .await
        .map_err(|e| SidecarError::dial(backend.addr, e))?;

    let addr = backend.addr;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!("Backend connection {} ended: {}", addr, e);
        }
    });

    sender
        .send_request(req)
        .await
        .map_err(|e| SidecarError::Codec(e.to_string()))
}

/// Relay a non-101 backend answer as an ordinary response
pub fn declined_response(res: Response<Incoming>, session_cookie: HeaderValue) -> Response<GatewayBody> {
    let (mut parts, body) = res.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    parts.headers.append(SET_COOKIE, session_cookie);

    let body = body.map_err(|e| Box::new(e) as BoxError).boxed_unsync();
    Response::from_parts(parts, body)
}
