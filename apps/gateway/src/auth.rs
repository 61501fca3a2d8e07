//! Credential extraction and the remote authorization service
//!
//! Token sources, in order: the server's session cookie, the `access_token`
//! query parameter, then an `Authorization: Bearer` header.

use crate::route::RouteMatch;
use crate::session::{SessionCodec, cookie_name, find_cookie};
use anyhow::{Context, Result};
use http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use reqwest::Client;
use std::future::Future;
use tracing::debug;

/// Where a resolved token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Session,
    QueryParameter,
    BearerHeader,
}

/// Resolve the request credential, if any
pub fn resolve_token(
    headers: &HeaderMap,
    query: Option<&str>,
    server_id: &str,
    sessions: &SessionCodec,
) -> Option<(String, TokenSource)> {
    let name = cookie_name(server_id);
    if let Some(token) = find_cookie(headers, &name).and_then(|v| sessions.decode(&name, v)) {
        return Some((token, TokenSource::Session));
    }

    if let Some(token) = query.and_then(query_token) {
        return Some((token, TokenSource::QueryParameter));
    }

    bearer_token(headers).map(|token| (token, TokenSource::BearerHeader))
}

fn query_token(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "access_token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() && !token.contains(' ') {
        Some(token.to_string())
    } else {
        None
    }
}

/// Decides whether a token may access a server
pub trait Authorizer: Send + Sync + 'static {
    /// `Ok(false)` is an explicit denial, `Err` a failed check
    fn authorize(&self, route: &RouteMatch, token: &str)
    -> impl Future<Output = Result<bool>> + Send;
}

/// Control-plane authorization service
///
/// `GET {scheme}://{api_root}/{version}/{namespace}/projects/{project}/servers/{server}/auth/`
/// with the token as a bearer credential; any 2xx grants access.
#[derive(Debug, Clone)]
pub struct ApiAuthorizer {
    client: Client,
    api_scheme: String,
    api_root: String,
}

impl ApiAuthorizer {
    pub fn new(client: Client, api_scheme: impl Into<String>, api_root: impl Into<String>) -> Self {
        Self {
            client,
            api_scheme: api_scheme.into(),
            api_root: api_root.into(),
        }
    }

    fn url_for(&self, route: &RouteMatch) -> String {
        format!(
            "{}://{}/{}/{}/projects/{}/servers/{}/auth/",
            self.api_scheme,
            self.api_root.trim_end_matches('/'),
            route.version,
            route.namespace,
            route.project_id,
            route.server_id
        )
    }
}

impl Authorizer for ApiAuthorizer {
    async fn authorize(&self, route: &RouteMatch, token: &str) -> Result<bool> {
        let url = self.url_for(route);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Authorization service unreachable at {}", url))?;

        let status = response.status();
        debug!(server_id = %route.server_id, "Authorization service answered {}", status);

        match status {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(false),
            s => anyhow::bail!("Authorization service returned {}", s),
        }
    }
}
