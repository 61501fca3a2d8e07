//! Common utilities and types for the kernel sidecar
//!
//! This crate provides the value types, error taxonomy, and stream helpers used by
//! both the tunnel subsystem and the authenticating gateway.

pub mod constants;
pub mod error;
pub mod models;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{Result, SidecarError};
pub use models::{Endpoint, TunnelRecord, TunnelSpec};
pub use utils::{
    current_timestamp_secs, decode_token_part, encode_token_part, is_resource_exhaustion,
    is_transient_accept_error, is_upgrade_request, splice, strip_hop_by_hop,
};
