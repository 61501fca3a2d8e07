//! Authenticating reverse proxy in front of the local kernel service
//!
//! Every request is matched against the endpoint route, authenticated
//! (session cookie, `access_token`, or bearer token; cached for a short TTL,
//! otherwise checked remotely) and then either proxied over HTTP or, for
//! WebSocket upgrades, spliced onto a raw backend connection.

use anyhow::Context;
use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use reqwest::Client;
use sidecar_common::constants::{
    ACCEPT_ERROR_BACKOFF_MS, DEFAULT_BACKEND_ADDR, HEADER_READ_TIMEOUT_SECS, MAX_BODY_SIZE_BYTES, REQUEST_TIMEOUT_SECS,
    TOKEN_CACHE_SWEEP_INTERVAL_SECS, TOKEN_CACHE_TTL_SECS,
};
use sidecar_common::{
    SidecarError, is_resource_exhaustion, is_transient_accept_error, is_upgrade_request,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub mod auth;
pub mod cache;
pub mod error_handling;
pub mod proxy;
pub mod rewrite;
pub mod route;
pub mod session;
pub mod upgrade;

#[cfg(test)]
mod tests;

pub use auth::{ApiAuthorizer, Authorizer, TokenSource, resolve_token};
pub use cache::TokenCache;
pub use rewrite::PublicOrigin;
pub use route::{RouteMatch, ServerScope};
pub use session::SessionCodec;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body used for every gateway response
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

/// The co-located backend service
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub addr: SocketAddr,
}

impl BackendConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_BACKEND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8888))),
        }
    }
}

/// Gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub scope: ServerScope,
    pub origin: PublicOrigin,
    pub request_timeout: Duration,
    pub header_read_timeout: Duration,
    pub token_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    pub fn new(scope: ServerScope, origin: PublicOrigin) -> Self {
        Self {
            scope,
            origin,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            header_read_timeout: Duration::from_secs(HEADER_READ_TIMEOUT_SECS),
            token_ttl: Duration::from_secs(TOKEN_CACHE_TTL_SECS),
            sweep_interval: Duration::from_secs(TOKEN_CACHE_SWEEP_INTERVAL_SECS),
            max_body_bytes: MAX_BODY_SIZE_BYTES,
        }
    }
}

/// Request dispatcher shared by all connections
pub struct Gateway<A> {
    config: GatewayConfig,
    backend: BackendConfig,
    authorizer: A,
    cache: Arc<TokenCache>,
    sessions: SessionCodec,
    client: Client,
}

impl<A: Authorizer> Gateway<A> {
    pub fn new(
        config: GatewayConfig,
        backend: BackendConfig,
        authorizer: A,
        sessions: SessionCodec,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .context("Failed to build backend HTTP client")?;

        Ok(Self {
            config,
            backend,
            authorizer,
            cache: Arc::new(TokenCache::new()),
            sessions,
            client,
        })
    }

    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Handle one request end to end
    pub async fn handle<B>(&self, req: Request<B>, peer: SocketAddr) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let Some(route) = RouteMatch::parse(req.uri().path()) else {
            debug!(path = %req.uri().path(), "No matching route");
            return error_handling::status_response(StatusCode::NOT_FOUND);
        };
        if !route.is_for(&self.config.scope) {
            return error_handling::sanitized_response(
                &SidecarError::RouteMismatch,
                &format!("route for server {}", route.server_id),
            );
        }

        let Some((token, source)) = resolve_token(
            req.headers(),
            req.uri().query(),
            &route.server_id,
            &self.sessions,
        ) else {
            warn!(token_present = false, path = %route.path, "Rejecting request without credentials");
            return error_handling::status_response(StatusCode::FORBIDDEN);
        };

        if !self.check_token(&route, &token, source).await {
            return error_handling::status_response(StatusCode::FORBIDDEN);
        }

        let cookie_name = session::cookie_name(&route.server_id);
        let session_cookie = match self.sessions.set_cookie(&cookie_name, &token) {
            Ok(cookie) => cookie,
            Err(e) => return error_handling::sanitized_response(&e, "session cookie"),
        };

        let upgrade = is_upgrade_request(req.headers());
        let dispatch = self.dispatch(req, &route, peer, session_cookie, upgrade);
        match tokio::time::timeout(self.config.request_timeout, dispatch).await {
            Ok(response) => response,
            Err(_) => {
                warn!(path = %route.path, upgrade, "Request timed out");
                error_handling::status_response(StatusCode::GATEWAY_TIMEOUT)
            }
        }
    }

    /// Cache hit, or a successful remote check that is then cached
    async fn check_token(&self, route: &RouteMatch, token: &str, source: TokenSource) -> bool {
        if self.cache.get(token) {
            debug!(token_present = true, ?source, "Token cache hit");
            return true;
        }

        match self.authorizer.authorize(route, token).await {
            Ok(true) => {
                debug!(token_present = true, ?source, "Token accepted by authorization service");
                self.cache.set(token, self.config.token_ttl);
                true
            }
            Ok(false) => {
                warn!(
                    token_present = true,
                    ?source,
                    server_id = %route.server_id,
                    "{}",
                    SidecarError::AuthDenied
                );
                false
            }
            Err(e) => {
                warn!(
                    token_present = true,
                    ?source,
                    server_id = %route.server_id,
                    "Authorization check failed: {:#}",
                    e
                );
                false
            }
        }
    }

    async fn dispatch<B>(
        &self,
        req: Request<B>,
        route: &RouteMatch,
        peer: SocketAddr,
        session_cookie: HeaderValue,
        upgrade: bool,
    ) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        if upgrade {
            return match upgrade::upgrade(req, &route.path, &self.backend, session_cookie).await {
                Ok(response) => response,
                Err(e) => error_handling::sanitized_response(&e, "upgrade"),
            };
        }

        let ctx = proxy::ProxyContext {
            client: &self.client,
            backend: &self.backend,
            origin: &self.config.origin,
            max_body_bytes: self.config.max_body_bytes,
        };
        match proxy::forward(&ctx, req, route, peer).await {
            Ok(mut response) => {
                response
                    .headers_mut()
                    .append(http::header::SET_COOKIE, session_cookie);
                response
            }
            Err(e) => {
                warn!(path = %route.path, "Proxy error: {}", e);
                proxy::error_body(&e)
            }
        }
    }
}

/// Accept connections and serve them until the listener fails
pub async fn serve<A: Authorizer>(gateway: Arc<Gateway<A>>, listener: TcpListener) -> anyhow::Result<()> {
    let local = listener.local_addr().context("Gateway listener has no address")?;
    info!("Gateway listening on {}, backend {}", local, gateway.backend.addr);

    let sweeper = gateway.cache.spawn_sweeper(gateway.config.sweep_interval);
    let header_read_timeout = gateway.config.header_read_timeout;

    let failure = loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if is_resource_exhaustion(&e) => {
                warn!("Accept on {} failed, retrying: {}", local, e);
                tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
                continue;
            }
            Err(e) if is_transient_accept_error(&e) => {
                debug!("Transient accept error on {}: {}", local, e);
                continue;
            }
            Err(source) => {
                break SidecarError::Accept {
                    endpoint: local.to_string(),
                    source,
                };
            }
        };

        let gateway = Arc::clone(&gateway);
        let service = service_fn(move |req: Request<Incoming>| {
            let gateway = Arc::clone(&gateway);
            async move { Ok::<_, Infallible>(gateway.handle(req, peer).await) }
        });

        tokio::spawn(async move {
            let conn = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(header_read_timeout)
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();
            if let Err(e) = conn.await {
                debug!(peer = %peer, "Connection error: {}", e);
            }
        });
    };

    sweeper.abort();
    Err(anyhow::Error::new(failure).context("Gateway stopped"))
}
