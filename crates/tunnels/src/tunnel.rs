use sidecar_common::constants::ACCEPT_ERROR_BACKOFF_MS;
use sidecar_common::{
    Endpoint, Result, SidecarError, TunnelSpec, is_resource_exhaustion, is_transient_accept_error,
    splice,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// An authenticated connection to a jump host
pub trait Session: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a forwarding channel to `remote`, on behalf of `originator`
    fn open(
        &self,
        remote: &Endpoint,
        originator: SocketAddr,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Dials and authenticates against a jump host
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    fn connect(
        &self,
        server: &Endpoint,
        username: &str,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// Where accepted connections are forwarded to
#[derive(Debug)]
struct Route {
    server: Endpoint,
    remote: Endpoint,
    username: String,
}

/// One configured forward: local listener -> jump host -> remote endpoint
///
/// Every accepted connection gets its own SSH connection and channel; the
/// tunnel keeps no per-connection state.
pub struct Tunnel<C> {
    local: Endpoint,
    route: Arc<Route>,
    connector: Arc<C>,
}

impl<C: Connector> Tunnel<C> {
    pub fn new(spec: &TunnelSpec, connector: Arc<C>) -> Self {
        Self {
            local: spec.local(),
            route: Arc::new(Route {
                server: spec.server(),
                remote: spec.remote(),
                username: spec.ssh_username.clone(),
            }),
            connector,
        }
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    /// Bind the local listener
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.local.to_string())
            .await
            .map_err(|source| SidecarError::Bind {
                endpoint: self.local.to_string(),
                source,
            })
    }

    /// Bind and accept forever
    ///
    /// Returns only on a bind failure or an unrecoverable listener error.
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "Tunnel listening on {} -> {} via {}",
            self.local, self.route.remote, self.route.server
        );

        loop {
            let (conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) if is_resource_exhaustion(&e) => {
                    warn!("Accept on {} failed, retrying: {}", self.local, e);
                    tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
                    continue;
                }
                Err(e) if is_transient_accept_error(&e) => {
                    debug!("Transient accept error on {}: {}", self.local, e);
                    continue;
                }
                Err(source) => {
                    return Err(SidecarError::Accept {
                        endpoint: self.local.to_string(),
                        source,
                    });
                }
            };

            debug!(peer = %peer, local = %self.local, "Accepted tunnel connection");

            let route = self.route.clone();
            let connector = self.connector.clone();
            tokio::spawn(async move {
                match forward(conn, peer, connector.as_ref(), &route).await {
                    Ok((up, down)) => {
                        debug!(
                            peer = %peer,
                            remote = %route.remote,
                            "Tunnel session closed ({} bytes up, {} bytes down)",
                            up,
                            down
                        );
                    }
                    Err(e) if e.is_connection_scoped() => {
                        warn!(
                            peer = %peer,
                            server = %route.server,
                            remote = %route.remote,
                            "Tunnel session failed: {}",
                            e
                        );
                    }
                    Err(e) => {
                        error!(peer = %peer, server = %route.server, "Tunnel session failed: {}", e);
                    }
                }
            });
        }
    }
}

/// Forward a single accepted connection
///
/// `conn` is dropped (closed) on every failure path.
async fn forward<C: Connector>(
    conn: TcpStream,
    peer: SocketAddr,
    connector: &C,
    route: &Route,
) -> Result<(u64, u64)> {
    let session = connector.connect(&route.server, &route.username).await?;
    let channel = session.open(&route.remote, peer).await?;

    // `session` stays alive until the splice ends
    let transferred = splice(conn, channel).await?;
    drop(session);
    Ok(transferred)
}
