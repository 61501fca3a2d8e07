/// Fixed loopback address of the co-located kernel service
pub const DEFAULT_BACKEND_ADDR: &str = "127.0.0.1:8888";

/// Default listen address of the authenticating gateway
pub const DEFAULT_GATEWAY_ADDR: &str = "0.0.0.0:8080";

/// Local tunnel listeners always bind all interfaces
pub const TUNNEL_BIND_HOST: &str = "0.0.0.0";

/// Pause before accepting again after the process ran out of descriptors
pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;

/// Default resource directory (holds `.ssh/id_rsa`)
pub const DEFAULT_RESOURCE_DIR: &str = "/resources";

/// Private key location relative to the resource directory
pub const SSH_KEY_RELATIVE_PATH: &str = ".ssh/id_rsa";

/// SSH dial + authentication timeout (15 seconds)
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Upper bound for handling a non-upgraded request (30 seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Time allowed for a client to send its request head (10 seconds)
pub const HEADER_READ_TIMEOUT_SECS: u64 = 10;

/// Lifetime of a validated token in the token cache (10 seconds)
pub const TOKEN_CACHE_TTL_SECS: u64 = 10;

/// Interval between token cache sweeps (60 seconds)
pub const TOKEN_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Session cookie max-age (7 days)
pub const SESSION_MAX_AGE_SECS: i64 = 86400 * 7;

/// Session cookie name prefix, followed by the server id
pub const SESSION_COOKIE_PREFIX: &str = "session-";

/// Maximum request body size buffered by the reverse proxy (10 MB)
pub const MAX_BODY_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum size of a backend response head on the upgrade path (64 KB)
pub const MAX_RESPONSE_HEAD_BYTES: usize = 64 * 1024;
