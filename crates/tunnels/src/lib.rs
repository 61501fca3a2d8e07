//! Outbound SSH tunnels for the kernel sidecar
//!
//! Each [`Tunnel`] listens on a local port and, per accepted connection, dials
//! a jump host over SSH, opens a `direct-tcpip` channel to the configured
//! remote endpoint and splices the two streams.

pub mod manager;
pub mod source;
pub mod ssh;
pub mod tunnel;

pub use manager::{TunnelManager, validate_records};
pub use source::{ApiTunnelSource, FileTunnelSource, TunnelSource};
pub use ssh::{SshConnector, SshSession};
pub use tunnel::{Connector, Session, Tunnel};
