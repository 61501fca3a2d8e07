//! What the sidecar runs in the foreground

use anyhow::{Context, Result, bail};
use sidecar_gateway::{Authorizer, Gateway, serve};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tracing::{error, info};

pub enum Runner<A> {
    /// Gateway in front of the backend, optionally starting the backend itself
    Proxy {
        gateway: Arc<Gateway<A>>,
        listen_addr: SocketAddr,
        backend_command: Vec<String>,
        resource_dir: PathBuf,
    },
    /// A single command; its exit status is the result
    Generic {
        command: Vec<String>,
        resource_dir: PathBuf,
    },
}

impl<A: Authorizer> Runner<A> {
    pub async fn run(self) -> Result<()> {
        match self {
            Runner::Proxy {
                gateway,
                listen_addr,
                backend_command,
                resource_dir,
            } => run_proxy(gateway, listen_addr, backend_command, &resource_dir).await,
            Runner::Generic {
                command,
                resource_dir,
            } => run_generic(&command, &resource_dir).await,
        }
    }
}

async fn run_proxy<A: Authorizer>(
    gateway: Arc<Gateway<A>>,
    listen_addr: SocketAddr,
    backend_command: Vec<String>,
    resource_dir: &Path,
) -> Result<()> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind gateway on {}", listen_addr))?;

    if backend_command.is_empty() {
        return serve(gateway, listener).await;
    }

    let mut backend = spawn(&backend_command, resource_dir)?;
    tokio::select! {
        result = serve(gateway, listener) => result,
        status = backend.wait() => {
            let status = status.context("Failed to wait for backend process")?;
            error!("Backend process exited with {}", status);
            bail!("backend process exited with {}", status)
        }
    }
}

async fn run_generic(command: &[String], resource_dir: &Path) -> Result<()> {
    let status = spawn(command, resource_dir)?
        .wait()
        .await
        .context("Failed to wait for command")?;
    info!("Command exited with {}", status);

    if status.success() {
        Ok(())
    } else {
        bail!("command exited with {}", status)
    }
}

fn spawn(command: &[String], resource_dir: &Path) -> Result<Child> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given");
    };
    info!("Starting {} in {}", program, resource_dir.display());

    Command::new(program)
        .args(args)
        .current_dir(resource_dir)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", program))
}
