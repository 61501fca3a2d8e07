use super::Endpoint;
use crate::constants::TUNNEL_BIND_HOST;
use crate::error::SidecarError;
use serde::{Deserialize, Serialize};

/// One tunnel row as delivered by a configuration source
///
/// `host`/`remote_port` address the SSH jump host, `endpoint` is the
/// `"host:port"` destination reachable from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub local_port: u32,
    pub host: String,
    pub remote_port: u32,
    pub endpoint: String,
    pub username: String,
}

/// A validated tunnel definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub local_port: u16,
    pub server_host: String,
    pub server_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub ssh_username: String,
}

impl TunnelSpec {
    /// Listen endpoint, always on all interfaces
    pub fn local(&self) -> Endpoint {
        Endpoint::new(TUNNEL_BIND_HOST, self.local_port)
    }

    /// SSH jump host endpoint
    pub fn server(&self) -> Endpoint {
        Endpoint::new(self.server_host.clone(), self.server_port)
    }

    /// Final destination, dialed through the jump host
    pub fn remote(&self) -> Endpoint {
        Endpoint::new(self.remote_host.clone(), self.remote_port)
    }
}

fn port_from(value: u32, field: &str) -> Result<u16, SidecarError> {
    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(SidecarError::InvalidSpec(format!(
            "{} out of range: {}",
            field, value
        ))),
    }
}

impl TryFrom<TunnelRecord> for TunnelSpec {
    type Error = SidecarError;

    fn try_from(record: TunnelRecord) -> Result<Self, Self::Error> {
        let local_port = port_from(record.local_port, "local_port")?;
        let server_port = port_from(record.remote_port, "remote_port")?;

        let server_host = record.host.trim();
        if server_host.is_empty() {
            return Err(SidecarError::InvalidSpec("empty ssh host".to_string()));
        }

        let username = record.username.trim();
        if username.is_empty() {
            return Err(SidecarError::InvalidSpec("empty ssh username".to_string()));
        }

        let remote: Endpoint = record.endpoint.parse()?;

        Ok(TunnelSpec {
            local_port,
            server_host: server_host.to_string(),
            server_port,
            remote_host: remote.host,
            remote_port: remote.port,
            ssh_username: username.to_string(),
        })
    }
}
