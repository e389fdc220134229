use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response returned by every API endpoint.
///
/// `message` is always safe to show to an end user. Upstream error text is
/// logged server-side and never copied into this payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "connection_failed")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub received: Option<serde_json::Value>,
    /// Request ID for correlating with server logs
    pub request_id: String,
    /// Hint about how to recover
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const TOOL_INVOCATION_FAILED: &str = "tool_invocation_failed";
    pub const UPSTREAM_SHAPE_MISMATCH: &str = "upstream_shape_mismatch";
    pub const AUTH_TIMEOUT: &str = "auth_timeout";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const FORBIDDEN: &str = "forbidden";
}
