//! Custom extractors: structured JSON rejections, the session key, the
//! caller's network address and brand path segments.
//!
//! Use `AppJson<T>` as a drop-in replacement for `axum::Json<T>` in handler signatures.
//! Unlike the standard extractor, deserialization failures produce a JSON `AppError`
//! instead of axum's default plain-text 422 response.

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, rejection::JsonRejection},
    http::request::Parts,
};
use portrait_core::Brand;

use crate::error::AppError;
use crate::middleware::session::SessionHandle;
use crate::services::geolocation::client_ip;

/// JSON extractor that converts deserialization errors to structured `AppError` responses.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Convert a `JsonRejection` to a structured `AppError::Validation`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();

    // "missing field `imageStyle`" → field = "imageStyle"
    let field_hint = extract_field_from_serde_message(&body_text);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field_hint.unwrap_or("body".to_string())),
        received: None,
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// Try to extract a field name from serde's error messages.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"]
        .iter()
        .find_map(|pattern| {
            let start = msg.find(pattern)? + pattern.len();
            let after = &msg[start..];
            let end = after.find('`')?;
            Some(after[..end].to_string())
        })
}

/// Session key for the tool-client pool. Mints a session (and cookie) when
/// the browser has none yet.
#[derive(Debug, Clone)]
pub struct SessionKey(pub String);

impl<S: Send + Sync> FromRequestParts<S> for SessionKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .map(|handle| SessionKey(handle.get_or_issue()))
            .ok_or_else(|| AppError::Internal("session layer is not installed".to_string()))
    }
}

/// The session the browser already has, without minting one.
#[derive(Debug, Clone)]
pub struct ExistingSession(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ExistingSession {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ExistingSession(
            parts
                .extensions
                .get::<SessionHandle>()
                .and_then(|handle| handle.existing().map(str::to_string)),
        ))
    }
}

/// Caller address: first `x-forwarded-for` hop, else the socket peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddress {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientAddress(client_ip(&parts.headers, peer)))
    }
}

impl ClientAddress {
    /// `None` for the placeholder used when no address is known.
    pub fn known(&self) -> Option<String> {
        (self.0 != "unknown").then(|| self.0.clone())
    }
}

/// Parse a brand path segment into a [`Brand`] or a 400.
pub fn parse_brand(raw: &str) -> Result<Brand, AppError> {
    raw.parse::<Brand>().map_err(|err| AppError::Validation {
        message: err.to_string(),
        field: Some("brand".to_string()),
        received: Some(serde_json::Value::String(raw.to_string())),
        docs_hint: Some("Supported brands: amazon, wayfair, officedepot, goodreads.".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;

    use super::*;

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize: missing field `imageStyle` at line 1 column 72";
        assert_eq!(
            extract_field_from_serde_message(msg),
            Some("imageStyle".to_string())
        );
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `foo`, expected one of `bar`, `baz`";
        assert_eq!(
            extract_field_from_serde_message(msg),
            Some("foo".to_string())
        );
    }

    #[test]
    fn returns_none_for_generic_error() {
        let msg = "invalid type: string, expected u64";
        assert_eq!(extract_field_from_serde_message(msg), None);
    }

    #[test]
    fn brand_parsing_rejects_unknown_brands() {
        assert_eq!(parse_brand("Office-Depot").unwrap(), Brand::OfficeDepot);
        match parse_brand("target").unwrap_err() {
            AppError::Validation { field, received, .. } => {
                assert_eq!(field.as_deref(), Some("brand"));
                assert_eq!(received, Some(serde_json::json!("target")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_address_uses_forwarded_header_then_peer() {
        let (mut parts, _) = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "198.51.100.1, 10.0.0.1")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        let ClientAddress(addr) = ClientAddress::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(addr, "198.51.100.1");

        let (mut parts, _) = Request::builder().uri("/").body(Body::empty()).unwrap().into_parts();
        parts
            .extensions
            .insert(ConnectInfo("192.0.2.5:4000".parse::<SocketAddr>().unwrap()));
        let address = ClientAddress::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(address.known().as_deref(), Some("192.0.2.5"));

        let (mut parts, _) = Request::builder().uri("/").body(Body::empty()).unwrap().into_parts();
        let address = ClientAddress::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(address.known(), None);
    }

    #[tokio::test]
    async fn session_key_requires_the_session_layer() {
        let (mut parts, _) = Request::builder().uri("/").body(Body::empty()).unwrap().into_parts();
        assert!(SessionKey::from_request_parts(&mut parts, &()).await.is_err());

        parts.extensions.insert(SessionHandle::default());
        let SessionKey(first) = SessionKey::from_request_parts(&mut parts, &()).await.unwrap();
        let SessionKey(second) = SessionKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(first, second);

        let ExistingSession(existing) =
            ExistingSession::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(existing, None);
    }
}
