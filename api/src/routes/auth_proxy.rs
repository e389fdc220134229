use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::extract::{AppJson, ClientAddress, parse_brand};
use crate::routes::proxy::relay_response;
use crate::sanitize::sanitize;
use crate::state::AppState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(90);
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["content-encoding", "content-length", "transfer-encoding"];

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/{brand}", post(auth_proxy))
}

/// Forward a brand sign-in request to the tool service with location context
#[utoipa::path(
    post,
    path = "/getgather/auth/{brand}",
    params(("brand" = String, Path, description = "Brand identifier")),
    request_body(content = Object, description = "Sign-in form fields, passed through"),
    responses(
        (status = 200, description = "Upstream response, relayed as-is"),
        (status = 400, description = "Unknown brand or malformed body", body = portrait_core::error::ApiError),
        (status = 502, description = "Upstream unreachable", body = portrait_core::error::ApiError)
    ),
    tag = "auth"
)]
pub async fn auth_proxy(
    State(state): State<AppState>,
    address: ClientAddress,
    Path(brand): Path<String>,
    AppJson(body): AppJson<Value>,
) -> Result<Response, AppError> {
    let brand = parse_brand(&brand)?;
    let mut data = match body {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(AppError::validation("request body must be a JSON object", "body")),
    };

    let location = state.geo.locate(&address.0).await;
    data.insert("forwarded_ip".to_string(), Value::String(location.ip.clone()));
    data.insert(
        "location".to_string(),
        serde_json::to_value(&location).map_err(|err| AppError::Internal(err.to_string()))?,
    );
    let data = Value::Object(data);

    tracing::info!(
        event = "auth_proxy_request",
        brand = %brand,
        payload = %sanitize(&data),
    );

    let target = format!("{}/api/auth/{}", state.settings.getgather_url, brand.id());
    let mut request = state.http.post(target).timeout(AUTH_TIMEOUT).json(&data);
    if let Some(key) = &state.settings.getgather_api_key {
        request = request.bearer_auth(key);
    }
    let upstream = request.send().await.map_err(|err| AppError::Upstream {
        service: "Auth",
        detail: err.to_string(),
    })?;

    tracing::info!(
        event = "auth_proxy_response",
        brand = %brand,
        status = upstream.status().as_u16(),
    );
    relay_response(upstream, SKIPPED_RESPONSE_HEADERS).await
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use axum::http::{HeaderMap, Request, StatusCode};
    use axum::Json;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{spawn_upstream, test_state};

    #[tokio::test]
    async fn body_is_enriched_and_upstream_reply_relayed() {
        let seen: Arc<Mutex<Option<(HeaderMap, Value)>>> = Arc::default();
        let recorder = seen.clone();
        let upstream = spawn_upstream(Router::new().route(
            "/api/auth/amazon",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let recorder = recorder.clone();
                async move {
                    *recorder.lock().unwrap() = Some((headers, body));
                    (StatusCode::CREATED, Json(json!({ "state": "awaiting_otp" })))
                }
            }),
        ))
        .await;

        let mut state = test_state(&upstream);
        Arc::make_mut(&mut state.settings).getgather_api_key = Some("gg-key".to_string());
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/amazon")
                    .header("content-type", "application/json")
                    .header("x-forwarded-for", "198.51.100.20")
                    .body(Body::from(r#"{"email":"a@b.c","password":"pw"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let relayed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(relayed["state"], "awaiting_otp");

        let (headers, body) = seen.lock().unwrap().take().expect("upstream was called");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer gg-key");
        assert_eq!(body["password"], "pw");
        assert_eq!(body["forwarded_ip"], "198.51.100.20");
        assert_eq!(body["location"]["ip"], "198.51.100.20");
    }

    #[tokio::test]
    async fn unknown_brand_is_rejected_before_forwarding() {
        let app = router().with_state(test_state("http://127.0.0.1:1"));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/target")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
