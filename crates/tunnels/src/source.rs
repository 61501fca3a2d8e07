//! Where tunnel definitions come from

use anyhow::{Context, Result};
use reqwest::Client;
use sidecar_common::TunnelRecord;
use std::future::Future;
use std::path::PathBuf;
use tracing::debug;

/// Yields the tunnel rows configured for a server
pub trait TunnelSource: Send + Sync {
    fn load(&self, server_id: &str) -> impl Future<Output = Result<Vec<TunnelRecord>>> + Send;
}

/// Control-plane API source
#[derive(Debug, Clone)]
pub struct ApiTunnelSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApiTunnelSource {
    /// `base_url` is `{scheme}://{api_root}/{version}/{namespace}/projects/{project}`
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url_for(&self, server_id: &str) -> String {
        format!("{}/servers/{}/ssh-tunnels/", self.base_url, server_id)
    }
}

impl TunnelSource for ApiTunnelSource {
    async fn load(&self, server_id: &str) -> Result<Vec<TunnelRecord>> {
        let url = self.url_for(server_id);
        debug!("Fetching tunnel definitions from {}", url);

        let records = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to reach control plane at {}", url))?
            .error_for_status()
            .context("Control plane rejected tunnel lookup")?
            .json::<Vec<TunnelRecord>>()
            .await
            .context("Malformed tunnel list from control plane")?;

        Ok(records)
    }
}

/// JSON file source: an array of tunnel rows for this server
#[derive(Debug, Clone)]
pub struct FileTunnelSource {
    path: PathBuf,
}

impl FileTunnelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TunnelSource for FileTunnelSource {
    async fn load(&self, server_id: &str) -> Result<Vec<TunnelRecord>> {
        debug!(
            server_id,
            "Reading tunnel definitions from {}",
            self.path.display()
        );
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let records = serde_json::from_slice(&raw)
            .with_context(|| format!("Malformed tunnel file {}", self.path.display()))?;
        Ok(records)
    }
}
