use thiserror::Error;

/// Failure of a single round-trip to the remote tool service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to tool service failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("tool service did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("tool service answered with HTTP {0}")]
    Status(u16),
    #[error("tool service returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("tool service protocol violation: {0}")]
    Protocol(String),
    #[error("transport is not connected")]
    NotConnected,
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: std::time::Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Request(err)
        }
    }
}

/// Errors surfaced by [`crate::ToolClient`] and [`crate::ClientPool`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection could not be established or re-established.
    #[error("could not connect to tool service")]
    Connection(#[source] TransportError),
    /// The tool call still failed after every retry.
    #[error("tool `{tool}` failed after {attempts} attempt(s)")]
    Invocation {
        tool: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl ClientError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }
}
