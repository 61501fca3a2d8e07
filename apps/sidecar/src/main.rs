use anyhow::{Context, Result};
use clap::Parser;
use sidecar_gateway::{ApiAuthorizer, Gateway, SessionCodec};
use sidecar_tunnels::{ApiTunnelSource, FileTunnelSource, SshConnector, TunnelManager};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod runner;

use config::{Args, Config, ServerType};
use runner::Runner;

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Start all configured tunnels
///
/// Tunnels are best effort: the foreground runner keeps going when they
/// cannot be started.
async fn start_tunnels(config: &Config, client: &reqwest::Client) -> Result<Vec<JoinHandle<()>>> {
    let connector = SshConnector::from_key_file(&config.tunnels.key_path, config.tunnels.connect_timeout)
        .with_context(|| format!("Failed to load SSH key {}", config.tunnels.key_path.display()))?;
    let manager = TunnelManager::new(connector);

    match &config.tunnels.tunnels_file {
        Some(path) => {
            info!("Loading tunnels from {}", path.display());
            manager
                .start(&FileTunnelSource::new(path), &config.api.server_id)
                .await
        }
        None => {
            let source = ApiTunnelSource::new(
                client.clone(),
                config.api.project_url(),
                config.api.api_key.clone(),
            );
            manager.start(&source, &config.api.server_id).await
        }
    }
}

fn build_runner(config: &Config, client: &reqwest::Client) -> Result<Runner<ApiAuthorizer>> {
    let runner = match config.server_type {
        ServerType::Proxy => {
            let authorizer =
                ApiAuthorizer::new(client.clone(), config.api.scheme.clone(), config.api.root.clone());
            let sessions = SessionCodec::new(config.secret_key.as_bytes())?;
            let gateway = Gateway::new(
                config.gateway.clone(),
                config.backend.clone(),
                authorizer,
                sessions,
            )?;
            Runner::Proxy {
                gateway: Arc::new(gateway),
                listen_addr: config.listen_addr,
                backend_command: config.command.clone(),
                resource_dir: config.resource_dir.clone(),
            }
        }
        ServerType::Generic => Runner::Generic {
            command: config.command.clone(),
            resource_dir: config.resource_dir.clone(),
        },
    };
    Ok(runner)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    info!("Sidecar v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(args)?;
    info!(
        namespace = %config.api.namespace,
        project_id = %config.api.project_id,
        server_id = %config.api.server_id,
        "Server type {:?}, resource dir {}",
        config.server_type,
        config.resource_dir.display()
    );

    let client = reqwest::Client::builder()
        .timeout(config.gateway.request_timeout)
        .build()
        .context("Failed to build control-plane HTTP client")?;

    let _tunnels = match start_tunnels(&config, &client).await {
        Ok(handles) => {
            info!("{} tunnel(s) running", handles.len());
            handles
        }
        Err(e) => {
            error!("Tunnels not started: {:#}", e);
            Vec::new()
        }
    };

    let runner = build_runner(&config, &client)?;

    tokio::select! {
        result = runner.run() => {
            if let Err(e) = &result {
                error!("Runner exited: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    }
}
