//! Signed session cookies
//!
//! A cookie value is `base64url(json) "." base64url(hmac)`, where the JSON
//! payload carries the validated token and its issue time. The MAC also
//! covers the cookie name, so a cookie cannot be replayed under another
//! server's name. Rotating the secret invalidates every session.

use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue, header::COOKIE};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sidecar_common::constants::{SESSION_COOKIE_PREFIX, SESSION_MAX_AGE_SECS};
use sidecar_common::{
    Result, SidecarError, current_timestamp_secs, decode_token_part, encode_token_part,
};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Allowed clock skew for cookies issued "in the future"
const MAX_CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
struct SessionPayload {
    token: String,
    iat: i64,
}

/// Session cookie name for a server
pub fn cookie_name(server_id: &str) -> String {
    format!("{}{}", SESSION_COOKIE_PREFIX, server_id)
}

/// Find a cookie value by name across all `Cookie` headers
pub fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

/// Encodes and verifies session cookies with a secret key
#[derive(Clone)]
pub struct SessionCodec {
    secret: Vec<u8>,
    max_age_secs: i64,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("max_age_secs", &self.max_age_secs)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SidecarError::Config("session secret must not be empty".to_string()));
        }
        Ok(Self {
            secret,
            max_age_secs: SESSION_MAX_AGE_SECS,
        })
    }

    fn mac(&self, name: &str, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SidecarError::Config(format!("invalid session secret: {}", e)))?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// Encode a cookie value holding `token`
    pub fn encode(&self, name: &str, token: &str) -> Result<String> {
        self.encode_at(name, token, current_timestamp_secs())
    }

    fn encode_at(&self, name: &str, token: &str, iat: i64) -> Result<String> {
        let payload = serde_json::to_vec(&SessionPayload {
            token: token.to_string(),
            iat,
        })?;
        let payload = encode_token_part(&payload);
        let signature = self.mac(name, &payload)?.finalize().into_bytes();
        Ok(format!("{}.{}", payload, encode_token_part(&signature)))
    }

    /// Verify a cookie value and return its token
    ///
    /// Anything malformed, forged or expired yields `None`.
    pub fn decode(&self, name: &str, value: &str) -> Option<String> {
        let (payload, signature) = value.split_once('.')?;
        let signature = decode_token_part(signature).ok()?;

        if self.mac(name, payload).ok()?.verify_slice(&signature).is_err() {
            debug!(cookie = name, "Ignoring session cookie with bad signature");
            return None;
        }

        let payload: SessionPayload = serde_json::from_slice(&decode_token_part(payload).ok()?).ok()?;
        let age = current_timestamp_secs() - payload.iat;
        if age > self.max_age_secs || age < -MAX_CLOCK_SKEW_SECS {
            debug!(cookie = name, "Ignoring expired session cookie");
            return None;
        }

        Some(payload.token)
    }

    /// `Set-Cookie` header value for a fresh session
    pub fn set_cookie(&self, name: &str, token: &str) -> Result<HeaderValue> {
        let value = self.encode(name, token)?;
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly",
            name, value, self.max_age_secs
        ))
        .map_err(|e| SidecarError::Config(format!("invalid session cookie: {}", e)))
    }
}
