//! Multi-tenant endpoint route
//!
//! `/{version}/{namespace}/projects/{project_id}/servers/{server_id}/endpoint/{service}{path}`

use once_cell::sync::Lazy;
use regex::Regex;
use sidecar_common::validation::{validate_path, validate_segment};
use tracing::debug;

static ENDPOINT_ROUTE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^/(?P<version>[^/]+)/(?P<namespace>[^/]+)/projects/(?P<project_id>[^/]+)/servers/(?P<server_id>[^/]+)/endpoint/(?P<service>[^/]+)(?P<path>/.*)?$",
    )
    .unwrap()
});

/// The server this gateway fronts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerScope {
    pub namespace: String,
    pub project_id: String,
    pub server_id: String,
}

/// Path variables of a matched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub version: String,
    pub namespace: String,
    pub project_id: String,
    pub server_id: String,
    pub service: String,
    /// Backend request path, always starting with `/`
    pub path: String,
}

impl RouteMatch {
    /// Match a request path against the endpoint route
    pub fn parse(path: &str) -> Option<Self> {
        let caps = ENDPOINT_ROUTE_REGEX.captures(path)?;
        let get = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

        let route = RouteMatch {
            version: get("version")?,
            namespace: get("namespace")?,
            project_id: get("project_id")?,
            server_id: get("server_id")?,
            service: get("service")?,
            path: get("path").unwrap_or_default(),
        };

        for (kind, value) in [
            ("version", &route.version),
            ("namespace", &route.namespace),
            ("project", &route.project_id),
            ("server", &route.server_id),
            ("service", &route.service),
        ] {
            if let Err(e) = validate_segment(kind, value) {
                debug!("Rejecting route: {}", e);
                return None;
            }
        }

        let path = match validate_path(&route.path) {
            Ok(path) => path,
            Err(e) => {
                debug!("Rejecting route: {}", e);
                return None;
            }
        };

        Some(RouteMatch { path, ..route })
    }

    /// External prefix that is stripped before forwarding
    pub fn prefix(&self) -> String {
        format!(
            "/{}/{}/projects/{}/servers/{}/endpoint/{}",
            self.version, self.namespace, self.project_id, self.server_id, self.service
        )
    }

    /// Whether the route addresses the given server
    pub fn is_for(&self, scope: &ServerScope) -> bool {
        self.namespace == scope.namespace
            && self.project_id == scope.project_id
            && self.server_id == scope.server_id
    }
}
