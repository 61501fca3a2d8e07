use crate::error::SidecarError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `(host, port)` pair used for dial and listen calls
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Renders `host:port`, bracketing IPv6 literals so the result is dialable
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses a single `host:port` string (`[v6]:port` for IPv6 literals)
impl FromStr for Endpoint {
    type Err = SidecarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| SidecarError::InvalidSpec(format!("missing port in {:?}", s)))?;

        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(|| {
                SidecarError::InvalidSpec(format!("unterminated IPv6 literal in {:?}", s))
            })?,
            None if host.contains(':') => {
                return Err(SidecarError::InvalidSpec(format!(
                    "ambiguous endpoint {:?} (bracket IPv6 hosts)",
                    s
                )));
            }
            None => host,
        };

        if host.is_empty() {
            return Err(SidecarError::InvalidSpec(format!("missing host in {:?}", s)));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| SidecarError::InvalidSpec(format!("invalid port in {:?}", s)))?;
        if port == 0 {
            return Err(SidecarError::InvalidSpec(format!("port 0 in {:?}", s)));
        }

        Ok(Endpoint::new(host, port))
    }
}
