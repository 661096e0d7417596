//! HTTP pass-through.
//!
//! The gateway owns no API semantics: requests are forwarded with their
//! method, path, query, headers and body intact, and the upstream status
//! and body come back untouched. Only an unreachable upstream produces a
//! gateway-authored response (502 with an `{"error": ...}` body).

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use parley_error::AppResult;

use crate::state::GatewayContext;

/// Fallback handler for everything that is not `/ws`.
pub async fn route_request(State(ctx): State<GatewayContext>, request: Request<Body>) -> Response {
    let path = request.uri().path();

    let (service_url, service_name) = match upstream_for(path) {
        Some(target) => {
            let (url_of, name) = target;
            (url_of(&ctx), name)
        }
        None => {
            return (
                StatusCode::NOT_FOUND,
                axum::Json(json!({ "error": "not found" })),
            )
                .into_response()
        }
    };

    // The owning service re-validates, but a bad token is turned away at
    // the edge instead of spending an upstream round trip.
    if requires_auth(path) {
        let verified = parley_auth::bearer_token(request.headers())
            .and_then(|token| ctx.auth.verify_token(token));
        if let Err(e) = verified {
            tracing::debug!(error = %e, path, "rejected unauthenticated request");
            return (
                StatusCode::UNAUTHORIZED,
                axum::Json(json!({ "error": "invalid or expired token" })),
            )
                .into_response();
        }
    }

    match forward(&ctx, &service_url, request).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, service = service_name, "upstream request failed");
            (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({ "error": format!("{} service unavailable", service_name) })),
            )
                .into_response()
        }
    }
}

type UpstreamUrl = fn(&GatewayContext) -> String;

/// Everything except account creation and login carries a bearer token.
fn requires_auth(path: &str) -> bool {
    !matches!(path, "/users/register" | "/users/login")
}

/// Path prefix -> owning service.
fn upstream_for(path: &str) -> Option<(UpstreamUrl, &'static str)> {
    if path.starts_with("/users") || path.starts_with("/groups") {
        Some((|ctx: &GatewayContext| ctx.config.user_service_url.clone(), "user"))
    } else if path.starts_with("/messages") {
        Some((
            |ctx: &GatewayContext| ctx.config.message_service_url.clone(),
            "message",
        ))
    } else {
        None
    }
}

async fn forward(
    ctx: &GatewayContext,
    service_url: &str,
    request: Request<Body>,
) -> AppResult<Response> {
    let path = request.uri().path().to_string();
    let target_url = match request.uri().query() {
        Some(query) => format!("{}{}?{}", service_url, path, query),
        None => format!("{}{}", service_url, path),
    };

    let method = request.method().clone();
    let headers = request.headers().clone();
    let body_bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| parley_error::AppError::internal(format!("failed to read body: {}", e)))?;

    let mut upstream = ctx.http.request(method, &target_url);
    for (key, value) in headers.iter() {
        // reqwest sets Host itself from the target URL.
        if key != "host" {
            upstream = upstream.header(key, value);
        }
    }
    if !body_bytes.is_empty() {
        upstream = upstream.body(body_bytes.to_vec());
    }

    let response = upstream.send().await?;

    let mut builder = Response::builder().status(response.status());
    for (key, value) in response.headers().iter() {
        builder = builder.header(key, value);
    }
    let body = response.bytes().await?;

    builder
        .body(Body::from(body.to_vec()))
        .map_err(|e| parley_error::AppError::internal(format!("failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_register_and_login_skip_auth() {
        assert!(!requires_auth("/users/register"));
        assert!(!requires_auth("/users/login"));
        assert!(requires_auth("/users/search"));
        assert!(requires_auth("/users/contacts"));
        assert!(requires_auth("/messages"));
        assert!(requires_auth("/groups"));
    }

    #[test]
    fn paths_map_to_their_owning_service() {
        assert_eq!(upstream_for("/users/login").unwrap().1, "user");
        assert_eq!(upstream_for("/users/contacts").unwrap().1, "user");
        assert_eq!(upstream_for("/groups").unwrap().1, "user");
        assert_eq!(upstream_for("/messages").unwrap().1, "message");
        assert_eq!(upstream_for("/messages/search").unwrap().1, "message");
        assert!(upstream_for("/metrics").is_none());
        assert!(upstream_for("/").is_none());
    }
}
