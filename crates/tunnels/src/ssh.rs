//! russh-backed jump host connector

use crate::tunnel::{Connector, Session};
use russh::ChannelStream;
use russh::client::{self, AuthResult, Handle, Msg};
use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use sidecar_common::{Endpoint, Result, SidecarError};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Accepts any host key, logging its fingerprint
///
/// Jump hosts are configured by the server owner and not pinned.
struct HostKeyLogger {
    server: String,
}

impl client::Handler for HostKeyLogger {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        info!(
            server = %self.server,
            "Accepting host key {} ({})",
            server_public_key.fingerprint(HashAlg::Sha256),
            server_public_key.algorithm()
        );
        Ok(true)
    }
}

/// Dials jump hosts over SSH with public-key authentication
///
/// The private key is loaded once and shared by every connection.
pub struct SshConnector {
    config: Arc<client::Config>,
    key: Arc<PrivateKey>,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(key: PrivateKey, connect_timeout: Duration) -> Self {
        let config = client::Config {
            nodelay: true,
            ..Default::default()
        };

        Self {
            config: Arc::new(config),
            key: Arc::new(key),
            connect_timeout,
        }
    }

    /// Load an unencrypted private key from disk
    pub fn from_key_file(path: &Path, connect_timeout: Duration) -> Result<Self> {
        let key = load_secret_key(path, None)
            .map_err(|e| SidecarError::Key(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded {} key from {}", key.algorithm(), path.display());
        Ok(Self::new(key, connect_timeout))
    }

    async fn connect_and_authenticate(
        &self,
        server: &Endpoint,
        username: &str,
    ) -> Result<Handle<HostKeyLogger>> {
        let handler = HostKeyLogger {
            server: server.to_string(),
        };
        let mut session = client::connect(self.config.clone(), server.to_string(), handler)
            .await
            .map_err(|e| SidecarError::dial(server, e))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .map_err(|e| SidecarError::dial(server, e))?
            .flatten();
        let key = PrivateKeyWithHashAlg::new(self.key.clone(), hash_alg);

        let auth = session
            .authenticate_publickey(username, key)
            .await
            .map_err(|e| SidecarError::dial(server, e))?;

        match auth {
            AuthResult::Success => Ok(session),
            AuthResult::Failure { .. } => Err(SidecarError::dial(
                server,
                format!("public key rejected for user {}", username),
            )),
        }
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, server: &Endpoint, username: &str) -> Result<SshSession> {
        match tokio::time::timeout(
            self.connect_timeout,
            self.connect_and_authenticate(server, username),
        )
        .await
        {
            Ok(result) => result.map(SshSession),
            Err(_) => Err(SidecarError::dial(
                server,
                format!("timed out after {:?}", self.connect_timeout),
            )),
        }
    }
}

/// An authenticated SSH connection
pub struct SshSession(Handle<HostKeyLogger>);

impl Session for SshSession {
    type Stream = ChannelStream<Msg>;

    async fn open(&self, remote: &Endpoint, originator: SocketAddr) -> Result<Self::Stream> {
        let channel = self
            .0
            .channel_open_direct_tcpip(
                remote.host.clone(),
                u32::from(remote.port),
                originator.ip().to_string(),
                u32::from(originator.port()),
            )
            .await
            .map_err(|e| SidecarError::dial(remote, e))?;

        Ok(channel.into_stream())
    }
}
