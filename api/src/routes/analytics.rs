use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::extract::{AppJson, ExistingSession};
use crate::error::AppError;
use crate::sanitize::sanitize;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analytics", post(record_analytics))
        .route("/log", post(record_log))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyticsRequest {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: Map<String, Value>,
    /// Send an identify call with `properties` as traits instead of a track
    #[serde(default)]
    pub identify: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogRequest {
    pub message: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    /// "error", "warn", "info" (default) or "debug"
    #[serde(default, rename = "type")]
    pub level: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Record a product analytics event for the browser session
#[utoipa::path(
    post,
    path = "/getgather/analytics",
    request_body = AnalyticsRequest,
    responses((status = 200, description = "Always accepted", body = SuccessResponse)),
    tag = "analytics"
)]
pub async fn record_analytics(
    State(state): State<AppState>,
    ExistingSession(session): ExistingSession,
    AppJson(req): AppJson<AnalyticsRequest>,
) -> Json<SuccessResponse> {
    let Some(session) = session else {
        tracing::debug!(event = "analytics_without_session");
        return Json(SuccessResponse { success: true });
    };

    if req.identify {
        state.analytics.identify(&session, req.properties);
    } else {
        match req.event.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(event) => {
                let mut properties = req.properties;
                properties.insert("sessionId".to_string(), Value::String(session.clone()));
                state.analytics.track(&session, event, properties);
            }
            None => tracing::debug!(event = "analytics_track_without_event", session_key = %session),
        }
    }
    Json(SuccessResponse { success: true })
}

/// Relay a browser log line into the server log, sanitized
#[utoipa::path(
    post,
    path = "/getgather/log",
    request_body = LogRequest,
    responses(
        (status = 200, description = "Logged", body = SuccessResponse),
        (status = 400, description = "Malformed body", body = portrait_core::error::ApiError)
    ),
    tag = "analytics"
)]
pub async fn record_log(
    ExistingSession(session): ExistingSession,
    AppJson(req): AppJson<LogRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let data = req.data.as_ref().map(sanitize).unwrap_or(Value::Null);
    let session = session.unwrap_or_default();
    let message = req.message;
    match req.level.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("error") => {
            tracing::error!(event = "client_log", session_key = %session, message = %message, data = %data)
        }
        Some("warn" | "warning") => {
            tracing::warn!(event = "client_log", session_key = %session, message = %message, data = %data)
        }
        Some("debug") => {
            tracing::debug!(event = "client_log", session_key = %session, message = %message, data = %data)
        }
        _ => tracing::info!(event = "client_log", session_key = %session, message = %message, data = %data),
    }
    Ok(Json(SuccessResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::middleware::session::SessionLayer;
    use crate::testing::test_state;

    fn app() -> Router {
        let state = test_state("http://127.0.0.1:1");
        let sessions = state.sessions.clone();
        router().layer(SessionLayer::new(sessions)).with_state(state)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn analytics_always_succeeds_and_never_issues_a_session() {
        let response = app()
            .oneshot(post_json("/analytics", r#"{"event":"page_view"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("set-cookie").is_none());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], br#"{"success":true}"#);
    }

    #[tokio::test]
    async fn log_requires_a_message() {
        let response = app()
            .oneshot(post_json("/log", r#"{"type":"error","data":{"password":"x"}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app()
            .oneshot(post_json("/log", r#"{"message":"clicked","type":"warn"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
