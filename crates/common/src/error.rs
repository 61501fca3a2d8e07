use thiserror::Error;

/// Error types for the sidecar
///
/// Connection-scoped variants (`Dial`, `AuthDenied`, `RouteMismatch`, `Upgrade`,
/// `Codec`) never travel past the task handling that connection. Listener-scoped
/// variants (`Bind`, `Accept`) and startup variants (`InvalidSpec`, `Key`,
/// `Config`) are fatal for the owning subsystem only.
#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener on {endpoint} failed: {source}")]
    Accept {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to dial {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },

    #[error("Authorization denied")]
    AuthDenied,

    #[error("Request path does not match the endpoint route")]
    RouteMismatch,

    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    #[error("Malformed backend response: {0}")]
    Codec(String),

    #[error("Invalid tunnel definition: {0}")]
    InvalidSpec(String),

    #[error("SSH key error: {0}")]
    Key(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SidecarError {
    /// Build a dial error for the given endpoint
    pub fn dial(endpoint: impl ToString, reason: impl ToString) -> Self {
        SidecarError::Dial {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error only affects a single connection
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            SidecarError::Dial { .. }
                | SidecarError::AuthDenied
                | SidecarError::RouteMismatch
                | SidecarError::Upgrade(_)
                | SidecarError::Codec(_)
                | SidecarError::Io(_)
        )
    }
}

/// Type alias for Results using SidecarError
pub type Result<T> = std::result::Result<T, SidecarError>;
