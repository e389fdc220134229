//! Passthrough to the tool service for hosted-link pages and their assets.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;

use crate::error::AppError;
use crate::state::AppState;

pub const PROXY_PREFIXES: &[&str] = &["/link", "/auth", "/api", "/__assets", "/__static/assets"];
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that describe one hop and must not be relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn router() -> Router<AppState> {
    PROXY_PREFIXES
        .iter()
        .fold(Router::new(), |router, prefix| {
            router
                .route(prefix, any(forward))
                .route(&format!("{prefix}/{{*rest}}"), any(forward))
        })
}

/// Copy `headers`, skipping hop-by-hop ones and anything in `extra_skip`.
pub fn relay_headers(headers: &HeaderMap, extra_skip: &[&str]) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            !HOP_BY_HOP.contains(&name) && !extra_skip.contains(&name)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

async fn forward(State(state): State<AppState>, req: Request) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let target = format!("{}{}", state.settings.getgather_url, path_and_query);

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| AppError::validation(format!("request body rejected: {err}"), "body"))?;

    // Our session cookie means nothing upstream.
    let headers = relay_headers(&parts.headers, &["cookie"]);

    let upstream = state
        .http
        .request(parts.method.clone(), &target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|err| AppError::Upstream {
            service: "Proxy",
            detail: err.to_string(),
        })?;

    tracing::debug!(
        event = "proxy_forwarded",
        method = %parts.method,
        path = %parts.uri.path(),
        status = upstream.status().as_u16(),
    );
    relay_response(upstream, &[]).await
}

/// Turn an upstream reply into our response, relaying status and headers.
pub async fn relay_response(
    upstream: reqwest::Response,
    extra_skip: &[&str],
) -> Result<Response, AppError> {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|err| AppError::Internal(err.to_string()))?;
    let headers = relay_headers(upstream.headers(), extra_skip);
    let body: Bytes = upstream.bytes().await.map_err(|err| AppError::Upstream {
        service: "Proxy",
        detail: err.to_string(),
    })?;
    Ok((status, headers, body).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{spawn_upstream, test_state};

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("x-custom", HeaderValue::from_static("1"));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));

        let relayed = relay_headers(&headers, &["content-encoding"]);
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed.get("x-custom").unwrap(), "1");
    }

    #[tokio::test]
    async fn hosted_link_pages_are_forwarded_with_query() {
        let upstream = spawn_upstream(Router::new().route(
            "/link/{id}",
            get(|req: axum::extract::Request| async move {
                (
                    StatusCode::ACCEPTED,
                    [("x-upstream", "yes")],
                    format!("page {}", req.uri()),
                )
            }),
        ))
        .await;
        let app = router().with_state(test_state(&upstream));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/link/abc?step=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"page /link/abc?step=2");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_bad_gateway() {
        let app = router().with_state(test_state("http://127.0.0.1:1"));
        let response = app
            .oneshot(Request::builder().uri("/api/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
