use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::HOST;
use axum::routing::{get, post};
use axum::{Json, Router};
use portrait_mcp_runtime::LinkStatus;
use portrait_mcp_runtime::link::{is_valid_link_id, rewrite_hosted_url};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::{AppJson, parse_brand};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/link/create", post(create_link))
        .route("/link/status/{link_id}", get(link_status))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateLinkRequest {
    /// Brand to link, e.g. "amazon"
    pub brand_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateLinkResponse {
    pub link_id: String,
    /// Page the user opens to sign in, on this app's origin when proxied
    pub hosted_link_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LinkStatusResponse {
    pub link_id: String,
    /// "pending" or "completed"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

/// Origin the browser reached us on: `APP_HOST`, else the request's host.
pub fn app_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(host) = &state.settings.app_host {
        return host.clone();
    }
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(if state.settings.production { "https" } else { "http" });
    format!("{scheme}://{host}")
}

/// Create a hosted sign-in link for a brand
#[utoipa::path(
    post,
    path = "/getgather/link/create",
    request_body = CreateLinkRequest,
    responses(
        (status = 200, description = "Link created", body = CreateLinkResponse),
        (status = 400, description = "Unknown brand", body = portrait_core::error::ApiError),
        (status = 502, description = "Link service failure", body = portrait_core::error::ApiError)
    ),
    tag = "link"
)]
pub async fn create_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(req): AppJson<CreateLinkRequest>,
) -> Result<Json<CreateLinkResponse>, AppError> {
    let brand = parse_brand(&req.brand_id)?;
    let link = state.links.create(brand).await?;
    tracing::info!(event = "link_created", brand = %brand, link_id = %link.link_id);

    Ok(Json(CreateLinkResponse {
        hosted_link_url: rewrite_hosted_url(
            &link.hosted_link_url,
            state.links.base_url(),
            &app_origin(&state, &headers),
        ),
        link_id: link.link_id,
    }))
}

/// Read a hosted link's completion status
#[utoipa::path(
    get,
    path = "/getgather/link/status/{link_id}",
    params(("link_id" = String, Path, description = "Link identifier")),
    responses(
        (status = 200, description = "Link status", body = LinkStatusResponse),
        (status = 400, description = "Malformed link id", body = portrait_core::error::ApiError),
        (status = 502, description = "Link service failure", body = portrait_core::error::ApiError)
    ),
    tag = "link"
)]
pub async fn link_status(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> Result<Json<LinkStatusResponse>, AppError> {
    if !is_valid_link_id(&link_id) {
        return Err(AppError::validation("link_id is not valid", "link_id"));
    }
    let status = state.links.status(&link_id).await?;
    let (status, profile_id) = match status {
        LinkStatus::Pending => ("pending", None),
        LinkStatus::Finished { profile_id } => ("completed", profile_id),
    };
    Ok(Json(LinkStatusResponse {
        link_id,
        status: status.to_string(),
        profile_id,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{spawn_upstream, test_state};

    async fn fake_link_service() -> String {
        spawn_upstream(
            Router::new()
                .route(
                    "/api/link/create",
                    post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                        let host = headers[HOST].to_str().unwrap().to_string();
                        assert_eq!(body["brand_id"], "wayfair");
                        Json(json!({
                            "link_id": "L1",
                            "hosted_link_url": format!("http://{host}/link/L1")
                        }))
                    }),
                )
                .route(
                    "/api/link/status/{id}",
                    get(|Path(id): Path<String>| async move {
                        match id.as_str() {
                            "done" => Ok(Json(json!({ "status": "FINISHED", "profile_id": "P1" }))),
                            "wait" => Ok(Json(json!({ "status": "PENDING" }))),
                            _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
                        }
                    }),
                ),
        )
        .await
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn created_links_are_served_from_the_app_host() {
        let upstream = fake_link_service().await;
        let mut state = test_state(&upstream);
        Arc::make_mut(&mut state.settings).app_host = Some("https://portrait.example".to_string());

        let response = router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/link/create")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"brand_id":"Wayfair"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["link_id"], "L1");
        assert_eq!(body["hosted_link_url"], "https://portrait.example/link/L1");
    }

    #[tokio::test]
    async fn status_maps_finished_to_completed() {
        let upstream = fake_link_service().await;
        let app = router().with_state(test_state(&upstream));

        let done = app
            .clone()
            .oneshot(Request::builder().uri("/link/status/done").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            json_body(done).await,
            json!({ "link_id": "done", "status": "completed", "profile_id": "P1" })
        );

        let waiting = app
            .clone()
            .oneshot(Request::builder().uri("/link/status/wait").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(waiting).await["status"], "pending");

        let broken = app
            .oneshot(Request::builder().uri("/link/status/oops").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(broken.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn origin_falls_back_to_forwarded_host() {
        let state = test_state("http://tools.test");
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "internal:3000".parse().unwrap());
        headers.insert("x-forwarded-host", "portrait.example".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(app_origin(&state, &headers), "https://portrait.example");

        headers.remove("x-forwarded-host");
        headers.remove("x-forwarded-proto");
        assert_eq!(app_origin(&state, &headers), "http://internal:3000");
    }
}
