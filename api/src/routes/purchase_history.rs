use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use portrait_core::PurchaseHistoryRecord;
use portrait_mcp_runtime::history::{self, RetrievalOutcome};
use portrait_mcp_runtime::link::{is_valid_link_id, rewrite_hosted_url};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::{ClientAddress, SessionKey, parse_brand};
use crate::routes::link::app_origin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/purchase-history/{brand}", get(get_purchase_history))
        .route(
            "/purchase-history-details/{brand}/{order_id}",
            get(get_purchase_history_details),
        )
        .route("/mcp-poll/{link_id}", get(poll_link))
}

/// Either the brand's records, or the hosted link the user must complete first.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseHistoryResponse {
    Ready {
        brand_id: String,
        records: Vec<PurchaseHistoryRecord>,
    },
    LinkRequired {
        brand_id: String,
        link_id: String,
        hosted_link_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetailResponse {
    pub brand_id: String,
    pub order_id: String,
    /// `null` when the detail tool had nothing for this order
    pub record: Option<PurchaseHistoryRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PollResponse {
    pub auth_completed: bool,
    pub link_id: String,
}

/// Fetch a brand's purchase history for the caller's session
#[utoipa::path(
    get,
    path = "/getgather/purchase-history/{brand}",
    params(("brand" = String, Path, description = "amazon, wayfair, officedepot or goodreads")),
    responses(
        (status = 200, description = "Records, or a hosted link to complete first", body = PurchaseHistoryResponse),
        (status = 400, description = "Unknown brand", body = portrait_core::error::ApiError),
        (status = 502, description = "Tool service failure or unexpected payload", body = portrait_core::error::ApiError)
    ),
    tag = "purchase-history"
)]
pub async fn get_purchase_history(
    State(state): State<AppState>,
    SessionKey(session): SessionKey,
    address: ClientAddress,
    headers: HeaderMap,
    Path(brand): Path<String>,
) -> Result<Json<PurchaseHistoryResponse>, AppError> {
    let brand = parse_brand(&brand)?;
    let client = state.pool.get(&session, address.known().as_deref()).await?;
    let outcome =
        history::fetch_purchase_history(&client, brand, &state.settings.retrieval_options())
            .await?;

    let response = match outcome {
        RetrievalOutcome::Ready(records) => PurchaseHistoryResponse::Ready {
            brand_id: brand.id().to_string(),
            records,
        },
        RetrievalOutcome::LinkRequired(link) => PurchaseHistoryResponse::LinkRequired {
            brand_id: brand.id().to_string(),
            hosted_link_url: rewrite_hosted_url(
                &link.hosted_link_url,
                &state.settings.getgather_url,
                &app_origin(&state, &headers),
            ),
            link_id: link.link_id,
            message: link.message,
        },
    };
    Ok(Json(response))
}

/// Fetch the details of one order (brands with a per-order detail tool only)
#[utoipa::path(
    get,
    path = "/getgather/purchase-history-details/{brand}/{order_id}",
    params(
        ("brand" = String, Path, description = "Brand identifier"),
        ("order_id" = String, Path, description = "Order identifier as returned in the history")
    ),
    responses(
        (status = 200, description = "Order detail", body = OrderDetailResponse),
        (status = 404, description = "Brand has no detail tool", body = portrait_core::error::ApiError),
        (status = 502, description = "Tool service failure", body = portrait_core::error::ApiError)
    ),
    tag = "purchase-history"
)]
pub async fn get_purchase_history_details(
    State(state): State<AppState>,
    SessionKey(session): SessionKey,
    address: ClientAddress,
    Path((brand, order_id)): Path<(String, String)>,
) -> Result<Json<OrderDetailResponse>, AppError> {
    let brand = parse_brand(&brand)?;
    let order_id = order_id.trim().to_string();
    if order_id.is_empty() {
        return Err(AppError::validation("order_id must not be empty", "order_id"));
    }

    let client = state.pool.get(&session, address.known().as_deref()).await?;
    let record = history::fetch_order_detail(
        &client,
        brand,
        &order_id,
        state.settings.tool_max_retries,
    )
    .await?;
    Ok(Json(OrderDetailResponse {
        brand_id: brand.id().to_string(),
        order_id,
        record,
    }))
}

/// One poll of a hosted link through the session's tool client.
///
/// Poll failures are reported as "not completed yet" so the browser keeps
/// polling; only its own attempt cap ends the loop.
#[utoipa::path(
    get,
    path = "/getgather/mcp-poll/{link_id}",
    params(("link_id" = String, Path, description = "Link identifier from a link_required response")),
    responses(
        (status = 200, description = "Current completion state", body = PollResponse),
        (status = 400, description = "Malformed link id", body = portrait_core::error::ApiError)
    ),
    tag = "link"
)]
pub async fn poll_link(
    State(state): State<AppState>,
    SessionKey(session): SessionKey,
    address: ClientAddress,
    Path(link_id): Path<String>,
) -> Result<Json<PollResponse>, AppError> {
    if !is_valid_link_id(&link_id) {
        return Err(AppError::Validation {
            message: "link_id is not valid".to_string(),
            field: Some("link_id".to_string()),
            received: Some(serde_json::Value::String(link_id)),
            docs_hint: None,
        });
    }

    let polled = match state.pool.get(&session, address.known().as_deref()).await {
        Ok(client) => {
            history::poll_signin(&client, &link_id, state.settings.tool_max_retries)
                .await
                .map_err(AppError::from)
        }
        Err(err) => Err(AppError::from(err)),
    };
    let auth_completed = match polled {
        Ok(status) => status.is_finished(),
        Err(err) => {
            tracing::debug!(event = "link_poll_failed", link_id = %link_id, error = ?err);
            false
        }
    };

    Ok(Json(PollResponse {
        auth_completed,
        link_id,
    }))
}
