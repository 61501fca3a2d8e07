//! Command-line arguments and the config structs built from them

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sidecar_common::constants::{
    DEFAULT_BACKEND_ADDR, DEFAULT_GATEWAY_ADDR, DEFAULT_RESOURCE_DIR, SSH_CONNECT_TIMEOUT_SECS,
    SSH_KEY_RELATIVE_PATH,
};
use sidecar_common::validation::validate_segment;
use sidecar_gateway::{BackendConfig, GatewayConfig, PublicOrigin, ServerScope};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// What the sidecar runs after the tunnels are up
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServerType {
    /// Serve the authenticating gateway in front of the backend
    Proxy,
    /// Run the trailing command and exit with it
    Generic,
}

/// CLI arguments for the sidecar
#[derive(Parser, Debug)]
#[command(name = "sidecar")]
#[command(about = "Per-server sidecar: SSH tunnels and an authenticating gateway", long_about = None)]
#[command(version)]
pub struct Args {
    /// API key for the control plane
    #[arg(long, env = "SIDECAR_API_KEY", default_value = "")]
    pub key: String,

    /// Namespace the server belongs to
    #[arg(long, env = "SIDECAR_NAMESPACE")]
    pub ns: String,

    /// Project id
    #[arg(long, env = "SIDECAR_PROJECT_ID")]
    pub project_id: String,

    /// Server id
    #[arg(long, env = "SIDECAR_SERVER_ID")]
    pub server_id: String,

    /// API version segment
    #[arg(long, env = "SIDECAR_VERSION", default_value = "v1")]
    pub version: String,

    /// Control-plane host (and optional port)
    #[arg(long, env = "SIDECAR_API_ROOT")]
    pub root: String,

    /// Control-plane scheme
    #[arg(long, env = "SIDECAR_API_SCHEME", default_value = "https")]
    pub scheme: String,

    /// Secret used to sign session cookies
    #[arg(long, env = "SIDECAR_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Resource directory (SSH key, working directory of commands)
    #[arg(long, env = "SIDECAR_RESOURCE_DIR", default_value = DEFAULT_RESOURCE_DIR)]
    pub resource_dir: PathBuf,

    /// Gateway listen address
    #[arg(long, env = "SIDECAR_LISTEN", default_value = DEFAULT_GATEWAY_ADDR)]
    pub listen: SocketAddr,

    /// Backend service address
    #[arg(long, env = "SIDECAR_BACKEND", default_value = DEFAULT_BACKEND_ADDR)]
    pub backend: SocketAddr,

    /// Public host used when rewriting redirects; empty keeps them host-relative
    #[arg(long, env = "SIDECAR_PUBLIC_HOST", default_value = "")]
    pub public_host: String,

    /// Request timeout in seconds
    #[arg(long, env = "SIDECAR_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// How long an authorized token is trusted, in seconds
    #[arg(long, env = "SIDECAR_TOKEN_TTL", default_value = "10")]
    pub token_ttl: u64,

    /// Read tunnel definitions from this JSON file instead of the control plane
    #[arg(long, env = "SIDECAR_TUNNELS_FILE")]
    pub tunnels_file: Option<PathBuf>,

    /// Server type
    #[arg(long = "type", env = "SIDECAR_TYPE", value_enum, default_value = "proxy")]
    pub server_type: ServerType,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Backend command (proxy) or the command to run (generic)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Control-plane coordinates
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub scheme: String,
    pub root: String,
    pub version: String,
    pub namespace: String,
    pub project_id: String,
    pub server_id: String,
    pub api_key: String,
}

impl ApiConfig {
    /// `{scheme}://{root}/{version}/{namespace}/projects/{project}`
    pub fn project_url(&self) -> String {
        format!(
            "{}://{}/{}/{}/projects/{}",
            self.scheme,
            self.root.trim_end_matches('/'),
            self.version,
            self.namespace,
            self.project_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub key_path: PathBuf,
    pub tunnels_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

/// Complete sidecar configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    pub listen_addr: SocketAddr,
    pub secret_key: String,
    pub resource_dir: PathBuf,
    pub tunnels: TunnelConfig,
    pub server_type: ServerType,
    pub command: Vec<String>,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        validate_segment("version", &args.version).context("Invalid --version")?;
        validate_segment("namespace", &args.ns).context("Invalid --ns")?;
        validate_segment("project", &args.project_id).context("Invalid --project-id")?;
        validate_segment("server", &args.server_id).context("Invalid --server-id")?;
        if args.secret_key.is_empty() {
            anyhow::bail!("--secret-key must not be empty");
        }
        if args.server_type == ServerType::Generic && args.command.is_empty() {
            anyhow::bail!("--type generic requires a command");
        }

        let scope = ServerScope {
            namespace: args.ns.clone(),
            project_id: args.project_id.clone(),
            server_id: args.server_id.clone(),
        };
        let origin = PublicOrigin {
            scheme: args.scheme.clone(),
            host: args.public_host,
        };
        let mut gateway = GatewayConfig::new(scope, origin);
        gateway.request_timeout = Duration::from_secs(args.request_timeout);
        gateway.token_ttl = Duration::from_secs(args.token_ttl);

        Ok(Self {
            api: ApiConfig {
                scheme: args.scheme,
                root: args.root,
                version: args.version,
                namespace: args.ns,
                project_id: args.project_id,
                server_id: args.server_id,
                api_key: args.key,
            },
            gateway,
            backend: BackendConfig { addr: args.backend },
            listen_addr: args.listen,
            secret_key: args.secret_key,
            tunnels: TunnelConfig {
                key_path: args.resource_dir.join(SSH_KEY_RELATIVE_PATH),
                tunnels_file: args.tunnels_file,
                connect_timeout: Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
            },
            resource_dir: args.resource_dir,
            server_type: args.server_type,
            command: args.command,
        })
    }
}
