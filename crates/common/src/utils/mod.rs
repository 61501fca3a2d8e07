mod encoding;
mod headers;
mod listener;
mod splice;
mod time;

pub use encoding::{decode_token_part, encode_token_part};
pub use headers::{is_upgrade_request, strip_hop_by_hop};
pub use listener::{is_resource_exhaustion, is_transient_accept_error};
pub use splice::splice;
pub use time::current_timestamp_secs;
