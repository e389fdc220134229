use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use portrait_core::ShapeError;
use portrait_core::error::{self, ApiError};
use portrait_mcp_runtime::{ClientError, LinkError, RetrievalError};

const RETRY_HINT: &str = "The account service could not be reached. Try again in a moment.";

/// Internal error type that converts to structured API responses.
///
/// Upstream detail is logged when the response is built and never copied
/// into the body.
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Unknown resource (404)
    NotFound { message: String },
    /// Tool service connection or invocation failure (502)
    Client(ClientError),
    /// Tool response matched no known shape (502)
    Shape(ShapeError),
    /// Tool ran but reported a failure (502)
    ToolReported { tool: String, message: String },
    /// Hosted-link REST or polling failure (502, or 504 on timeout)
    Link(LinkError),
    /// Any other upstream HTTP failure (502)
    Upstream { service: &'static str, detail: String },
    /// Optional collaborator is not configured (503)
    Unavailable { service: &'static str },
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Link(LinkError::AuthTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Link(LinkError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            AppError::Client(_)
            | AppError::Shape(_)
            | AppError::ToolReported { .. }
            | AppError::Link(_)
            | AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AppError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn body(code: &str, message: impl Into<String>, request_id: String) -> ApiError {
    ApiError {
        error: code.to_string(),
        message: message.into(),
        field: None,
        received: None,
        request_id,
        docs_hint: None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let status = self.status();

        let api_error = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => ApiError {
                error: error::codes::VALIDATION_FAILED.to_string(),
                message,
                field,
                received,
                request_id,
                docs_hint,
            },
            AppError::NotFound { message } => {
                body(error::codes::NOT_FOUND, message, request_id)
            }
            AppError::Client(err) => {
                tracing::warn!(
                    event = "tool_service_error",
                    request_id = %request_id,
                    error = %err,
                    source = ?std::error::Error::source(&err).map(ToString::to_string),
                );
                let code = if err.is_connection() {
                    error::codes::CONNECTION_FAILED
                } else {
                    error::codes::TOOL_INVOCATION_FAILED
                };
                ApiError {
                    docs_hint: Some(RETRY_HINT.to_string()),
                    ..body(code, "Connection to the account service failed", request_id)
                }
            }
            AppError::Shape(err) => {
                tracing::error!(event = "upstream_shape_mismatch", request_id = %request_id, error = %err);
                body(
                    error::codes::UPSTREAM_SHAPE_MISMATCH,
                    "The account service returned data in an unexpected format",
                    request_id,
                )
            }
            AppError::ToolReported { tool, message } => {
                tracing::warn!(
                    event = "tool_reported_error",
                    request_id = %request_id,
                    tool = %tool,
                    message = %message,
                );
                ApiError {
                    docs_hint: Some(RETRY_HINT.to_string()),
                    ..body(
                        error::codes::TOOL_INVOCATION_FAILED,
                        "The account service could not complete the request",
                        request_id,
                    )
                }
            }
            AppError::Link(LinkError::AuthTimeout { link_id, attempts }) => {
                tracing::warn!(event = "auth_timeout", request_id = %request_id, link_id = %link_id, attempts);
                ApiError {
                    docs_hint: Some("Start the sign-in again to get a fresh link.".to_string()),
                    ..body(
                        error::codes::AUTH_TIMEOUT,
                        "Sign-in was not completed in time",
                        request_id,
                    )
                }
            }
            AppError::Link(err) => {
                tracing::warn!(event = "link_service_error", request_id = %request_id, error = %err);
                ApiError {
                    docs_hint: Some(RETRY_HINT.to_string()),
                    ..body(error::codes::UPSTREAM_ERROR, "Sign-in link request failed", request_id)
                }
            }
            AppError::Upstream { service, detail } => {
                tracing::warn!(
                    event = "upstream_error",
                    request_id = %request_id,
                    service,
                    detail = %detail,
                );
                body(
                    error::codes::UPSTREAM_ERROR,
                    format!("{service} request failed"),
                    request_id,
                )
            }
            AppError::Unavailable { service } => body(
                error::codes::SERVICE_UNAVAILABLE,
                format!("{service} is not configured on this server"),
                request_id,
            ),
            AppError::Internal(msg) => {
                tracing::error!(event = "internal_error", request_id = %request_id, error = %msg);
                body(
                    error::codes::INTERNAL_ERROR,
                    "An internal error occurred",
                    request_id,
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        AppError::Client(err)
    }
}

impl From<ShapeError> for AppError {
    fn from(err: ShapeError) -> Self {
        AppError::Shape(err)
    }
}

impl From<LinkError> for AppError {
    fn from(err: LinkError) -> Self {
        AppError::Link(err)
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Client(err) => AppError::Client(err),
            RetrievalError::Shape(err) => AppError::Shape(err),
            RetrievalError::ToolReported { tool, message } => {
                AppError::ToolReported { tool, message }
            }
            RetrievalError::Unsupported(brand) => AppError::NotFound {
                message: format!("{} has no order details", brand.display_name()),
            },
        }
    }
}
