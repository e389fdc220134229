use std::time::Duration;

use crate::error::TransportError;

pub const USER_AGENT: &str = concat!("data-portrait/", env!("CARGO_PKG_VERSION"));

/// Shared reqwest client for talking to the tool service.
///
/// The per-request timeout is applied by callers; this only bounds connect.
pub fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(TransportError::Request)
}

/// `https://host/` and `https://host` name the same service.
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", normalize_base_url(base_url), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slashes() {
        assert_eq!(endpoint("http://tools:8000/", "/mcp"), "http://tools:8000/mcp");
        assert_eq!(
            endpoint(" http://tools:8000 ", "api/link/create"),
            "http://tools:8000/api/link/create"
        );
    }
}
