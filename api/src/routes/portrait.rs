use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::services::portrait::{
    GeneratedImage, PortraitError, PortraitSelections, build_prompt, product_names_from_orders,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/generate-portrait", post(generate_portrait))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortraitRequest {
    /// e.g. "realistic", "watercolor", "anime"
    #[serde(default)]
    pub image_style: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    /// Requested model; only the hosted FLUX model is available
    #[serde(default)]
    pub model: Option<String>,
    /// Purchase-history records the portrait should reflect
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub purchase_data: Vec<Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PortraitResponse {
    pub success: bool,
    pub image: GeneratedImage,
}

impl From<PortraitError> for AppError {
    fn from(err: PortraitError) -> Self {
        match err {
            PortraitError::Io(err) => AppError::Internal(format!("portrait file: {err}")),
            other => AppError::Upstream {
                service: "Portrait generation",
                detail: other.to_string(),
            },
        }
    }
}

/// Generate a portrait image from the user's purchases and selections
#[utoipa::path(
    post,
    path = "/getgather/generate-portrait",
    request_body = PortraitRequest,
    responses(
        (status = 200, description = "Image generated and stored", body = PortraitResponse),
        (status = 400, description = "Malformed body", body = portrait_core::error::ApiError),
        (status = 429, description = "Rate limited", body = portrait_core::error::ApiError),
        (status = 502, description = "Image provider failure", body = portrait_core::error::ApiError),
        (status = 503, description = "No image provider configured", body = portrait_core::error::ApiError)
    ),
    tag = "portrait"
)]
pub async fn generate_portrait(
    State(state): State<AppState>,
    AppJson(req): AppJson<PortraitRequest>,
) -> Result<Json<PortraitResponse>, AppError> {
    let generator = state.portraits.as_ref().ok_or(AppError::Unavailable {
        service: "Portrait generation",
    })?;

    if let Some(model) = req.model.as_deref() {
        tracing::debug!(event = "portrait_model_requested", model = %model);
    }
    let prompt = build_prompt(&PortraitSelections {
        image_style: &req.image_style,
        gender: req.gender.as_deref(),
        traits: &req.traits,
        product_names: product_names_from_orders(&req.purchase_data),
    });
    let image = generator.generate(&prompt).await?;
    Ok(Json(PortraitResponse {
        success: true,
        image,
    }))
}
