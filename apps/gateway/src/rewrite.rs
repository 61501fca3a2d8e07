//! `Location` rewriting for path-based routing
//!
//! The backend only knows its own paths. A redirect to `/login` must become
//! `/{version}/.../endpoint/{service}/login` on the public host, otherwise the
//! browser leaves the gateway.

use url::Url;

/// Public origin the gateway is reached through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicOrigin {
    pub scheme: String,
    /// Host (and optional port); empty keeps rewritten locations host-relative
    pub host: String,
}

/// Rewrite a backend `Location` value into the external prefix
///
/// `request_path` is the backend path of the request, used to resolve
/// relative references. Returns `None` when the value should pass through
/// unchanged: already prefixed, pointing at a foreign host, or unparseable.
pub fn rewrite_location(
    location: &str,
    request_path: &str,
    prefix: &str,
    backend_authority: &str,
    origin: &PublicOrigin,
) -> Option<String> {
    let is_absolute = Url::parse(location).is_ok();
    let base = Url::parse(&format!("http://{}", backend_authority))
        .ok()?
        .join(request_path)
        .ok()?;
    let resolved = base.join(location).ok()?;

    if is_absolute && !points_at_backend(&resolved, backend_authority) {
        return None;
    }

    let path = resolved.path();
    if path == prefix || path.starts_with(&format!("{}/", prefix)) {
        return None;
    }

    let mut rewritten = String::new();
    if !origin.host.is_empty() {
        rewritten.push_str(&origin.scheme);
        rewritten.push_str("://");
        rewritten.push_str(&origin.host);
    }
    rewritten.push_str(prefix);
    rewritten.push_str(path);
    if let Some(query) = resolved.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    if let Some(fragment) = resolved.fragment() {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }

    Some(rewritten)
}

fn points_at_backend(url: &Url, backend_authority: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let is_loopback_name = matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "0.0.0.0");
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    authority == backend_authority || is_loopback_name
}
