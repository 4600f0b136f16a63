//! JSON answers for unknown routes and unsupported methods.

use axum::Json;
use axum::http::{Method, StatusCode, Uri};
use serde_json::json;

use crate::models::RouteNotFound;

fn route_error(
    status: StatusCode,
    message: &'static str,
    method: &Method,
    uri: &Uri,
) -> (StatusCode, Json<serde_json::Value>) {
    let body = RouteNotFound {
        message,
        status_code: status.as_u16(),
        path: uri.path().to_string(),
        method: method.to_string(),
    };
    (status, Json(json!({ "success": false, "error": body })))
}

/// Fallback for paths no route matches.
pub async fn not_found(method: Method, uri: Uri) -> (StatusCode, Json<serde_json::Value>) {
    route_error(StatusCode::NOT_FOUND, "Route not found", &method, &uri)
}

/// Fallback for known paths hit with an unsupported method.
pub async fn method_not_allowed(
    method: Method,
    uri: Uri,
) -> (StatusCode, Json<serde_json::Value>) {
    route_error(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed",
        &method,
        &uri,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_found_message() {
        let uri: Uri = "/missing".parse().unwrap();
        let (status, Json(body)) = not_found(Method::GET, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "Route not found");
        assert_eq!(body["error"]["path"], "/missing");
    }

    #[tokio::test]
    async fn test_method_not_allowed_message() {
        let uri: Uri = "/api/contact".parse().unwrap();
        let (status, Json(body)) = method_not_allowed(Method::PUT, uri).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"]["message"], "Method not allowed");
        assert_eq!(body["error"]["statusCode"], 405);
        assert_eq!(body["error"]["method"], "PUT");
    }
}
