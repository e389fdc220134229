use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

/// Apply the security-header baseline to all responses. HSTS and the
/// referrer policy are only sent in production.
pub async fn apply(State(production): State<bool>, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
    if production {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
        headers.insert(
            "referrer-policy",
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{HeaderMap, Request, StatusCode};
    use axum::routing::get;
    use axum::{Router, middleware};
    use tower::ServiceExt;

    async fn served_headers(production: bool) -> HeaderMap {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::NO_CONTENT }))
            .layer(middleware::from_fn_with_state(production, super::apply));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.headers().clone()
    }

    #[tokio::test]
    async fn baseline_is_always_sent() {
        for production in [false, true] {
            let headers = served_headers(production).await;
            assert_eq!(headers["x-content-type-options"], "nosniff");
            assert_eq!(headers["x-frame-options"], "DENY");
            assert_eq!(headers["x-xss-protection"], "1; mode=block");
        }
    }

    #[tokio::test]
    async fn transport_policies_only_in_production() {
        let dev = served_headers(false).await;
        assert!(!dev.contains_key("strict-transport-security"));
        assert!(!dev.contains_key("referrer-policy"));

        let prod = served_headers(true).await;
        assert_eq!(
            prod["strict-transport-security"],
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(prod["referrer-policy"], "strict-origin-when-cross-origin");
    }
}
