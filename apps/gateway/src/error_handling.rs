//! Error handling and sanitization
//!
//! Clients only ever see a status code and its canonical reason as a
//! `text/plain` body; the full error is logged here.

use crate::GatewayBody;
use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header::CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use sidecar_common::SidecarError;
use tracing::{error, warn};

/// Plain-text response carrying only the canonical reason
pub fn status_response(status: StatusCode) -> Response<GatewayBody> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(full_body(Bytes::from(format!("{}\n", reason))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Map an error to the status the client sees
pub fn status_for(e: &SidecarError) -> StatusCode {
    match e {
        SidecarError::AuthDenied => StatusCode::FORBIDDEN,
        SidecarError::RouteMismatch => StatusCode::NOT_FOUND,
        SidecarError::Dial { .. } | SidecarError::Codec(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log the full error internally and return a generic response
///
/// # Examples
///
/// ```
/// use sidecar_common::SidecarError;
/// use sidecar_gateway::error_handling::sanitized_response;
///
/// let err = SidecarError::dial("127.0.0.1:8888", "connection refused");
/// let response = sanitized_response(&err, "backend dial");
/// assert_eq!(response.status(), 502);
/// ```
pub fn sanitized_response(e: &SidecarError, context: &str) -> Response<GatewayBody> {
    let status = status_for(e);
    if status.is_server_error() {
        error!("{} failed: {}", context, e);
    } else {
        warn!("{} rejected: {}", context, e);
    }
    status_response(status)
}

pub(crate) fn full_body(bytes: Bytes) -> GatewayBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response<GatewayBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_status_response_is_generic() {
        let response = status_response(StatusCode::FORBIDDEN);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "Forbidden\n");
    }

    #[tokio::test]
    async fn test_sanitized_response_hides_details() {
        let err = SidecarError::Codec("unexpected header line from 10.0.1.5".to_string());
        let response = sanitized_response(&err, "upgrade");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = body_text(response).await;
        assert_eq!(body, "Bad Gateway\n");
        assert!(!body.contains("10.0.1.5"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&SidecarError::AuthDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&SidecarError::RouteMismatch), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&SidecarError::dial("127.0.0.1:8888", "refused")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&SidecarError::Upgrade("no upgrade handle".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
