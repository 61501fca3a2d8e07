use crate::source::TunnelSource;
use crate::tunnel::{Connector, Tunnel};
use anyhow::Context;
use sidecar_common::{SidecarError, TunnelRecord, TunnelSpec};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Validate every record before anything starts
///
/// A single malformed record rejects the whole set.
pub fn validate_records(records: Vec<TunnelRecord>) -> Result<Vec<TunnelSpec>, SidecarError> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            TunnelSpec::try_from(record).map_err(|e| match e {
                SidecarError::InvalidSpec(reason) => {
                    SidecarError::InvalidSpec(format!("tunnel #{}: {}", index, reason))
                }
                other => other,
            })
        })
        .collect()
}

/// Starts one tunnel per configured definition
pub struct TunnelManager<C> {
    connector: Arc<C>,
}

impl<C: Connector> TunnelManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    /// Load, validate and start the tunnels configured for `server_id`
    pub async fn start<S: TunnelSource>(
        &self,
        source: &S,
        server_id: &str,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let records = source
            .load(server_id)
            .await
            .context("Failed to load tunnel definitions")?;
        let specs = validate_records(records)?;

        info!("Starting {} tunnel(s) for server {}", specs.len(), server_id);
        Ok(self.spawn(&specs))
    }

    /// Spawn a background task per tunnel
    ///
    /// A tunnel that fails to bind or whose listener dies is logged; the
    /// others keep running.
    pub fn spawn(&self, specs: &[TunnelSpec]) -> Vec<JoinHandle<()>> {
        specs
            .iter()
            .map(|spec| {
                let tunnel = Tunnel::new(spec, self.connector.clone());
                tokio::spawn(async move {
                    if let Err(e) = tunnel.start().await {
                        error!(local = %tunnel.local(), "Tunnel stopped: {}", e);
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileTunnelSource;
    use crate::tunnel::tests::{DirectConnector, echo_server};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn record(local_port: u32, endpoint: &str) -> TunnelRecord {
        TunnelRecord {
            local_port,
            host: "jump.example.com".to_string(),
            remote_port: 22,
            endpoint: endpoint.to_string(),
            username: "tunneluser".to_string(),
        }
    }

    #[test]
    fn test_validate_records() {
        let specs = validate_records(vec![
            record(9000, "db.internal:5432"),
            record(9001, "cache.internal:6379"),
        ])
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].remote_host, "cache.internal");
    }

    #[test]
    fn test_one_bad_record_rejects_all() {
        let err = validate_records(vec![
            record(9000, "db.internal:5432"),
            record(9001, "cache.internal"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("tunnel #1"));
    }

    #[test]
    fn test_validate_empty() {
        assert!(validate_records(Vec::new()).unwrap().is_empty());
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("0.0.0.0:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_start_from_file_source() {
        let echo = echo_server().await;
        let port = free_port().await;

        let records = serde_json::to_vec(&vec![record(port as u32, "db.internal:5432")]).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&records).unwrap();

        let manager = TunnelManager::new(DirectConnector {
            target: Some(echo),
            dials: AtomicUsize::new(0),
        });
        let handles = manager
            .start(&FileTunnelSource::new(file.path()), "s1")
            .await
            .unwrap();
        assert_eq!(handles.len(), 1);

        // The listener is bound asynchronously
        let mut client = None;
        for _ in 0..50 {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
                client = Some(stream);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut client = client.expect("tunnel should be listening");

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(manager.connector.dials.load(Ordering::SeqCst), 1);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_start_rejects_malformed_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let records = serde_json::to_vec(&vec![record(9000, "no-port")]).unwrap();
        file.write_all(&records).unwrap();

        let manager = TunnelManager::new(DirectConnector {
            target: None,
            dials: AtomicUsize::new(0),
        });
        let result = manager.start(&FileTunnelSource::new(file.path()), "s1").await;
        assert!(result.is_err());
    }
}
