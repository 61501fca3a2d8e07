//! Input validation for security-critical data
//!
//! Route identifiers end up in control-plane URLs, cookie names and log lines;
//! these checks keep malformed input from reaching any of them.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Regex for route identifiers (version, namespace, project, server, service)
static ROUTE_SEGMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._~-]{0,127}$").unwrap());

/// Maximum length for HTTP paths
pub const MAX_PATH_LENGTH: usize = 2048;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid {0} segment: {1}")]
    InvalidSegment(&'static str, String),

    #[error("Path too long: {0} bytes (max: {1})")]
    PathTooLong(usize, usize),
}

/// Validate a single route identifier
///
/// Identifiers are interpolated into control-plane URLs and cookie names, so
/// they are limited to unreserved URL characters.
///
/// # Examples
///
/// ```
/// use sidecar_common::validation::validate_segment;
///
/// assert!(validate_segment("server", "srv-42").is_ok());
/// assert!(validate_segment("server", "../etc").is_err());
/// assert!(validate_segment("server", "").is_err());
/// ```
pub fn validate_segment(kind: &'static str, value: &str) -> Result<(), ValidationError> {
    if !ROUTE_SEGMENT_REGEX.is_match(value) {
        return Err(ValidationError::InvalidSegment(
            kind,
            value.chars().take(50).collect::<String>(), // Limit error message
        ));
    }
    Ok(())
}

/// Validate and sanitize the backend request path
///
/// - Removes control characters
/// - Enforces length limits
/// - Ensures path starts with /
pub fn validate_path(path: &str) -> Result<String, ValidationError> {
    // Check length
    if path.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::PathTooLong(path.len(), MAX_PATH_LENGTH));
    }

    // Remove control characters and ensure valid UTF-8
    let sanitized: String = path
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect();

    // Ensure path starts with /
    if sanitized.is_empty() {
        Ok("/".to_string())
    } else if sanitized.starts_with('/') {
        Ok(sanitized)
    } else {
        Ok(format!("/{}", sanitized))
    }
}
