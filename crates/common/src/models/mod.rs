mod endpoint;
mod tunnel;

pub use endpoint::Endpoint;
pub use tunnel::{TunnelRecord, TunnelSpec};
