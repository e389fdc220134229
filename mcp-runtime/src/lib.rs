//! Session-scoped access to the remote tool service.
//!
//! Each browser session owns one [`ToolClient`], created lazily by the
//! [`ClientPool`] and evicted after a period of inactivity. The hosted-link
//! protocol in [`link`] and the retrieval flow in [`history`] are built on
//! top of the client's retrying `invoke`.

pub mod client;
pub mod error;
pub mod history;
pub mod http;
pub mod link;
pub mod pool;
pub mod transport;
pub mod util;

#[cfg(test)]
mod testing;

pub use client::{DEFAULT_IDLE_THRESHOLD, DEFAULT_MAX_RETRIES, ToolClient};
pub use error::{ClientError, TransportError};
pub use history::{RetrievalError, RetrievalOptions, RetrievalOutcome};
pub use http::StreamableHttpConnector;
pub use link::{HostedLink, HostedLinkApi, LinkError, LinkSession, LinkState, LinkStatus, PollPolicy};
pub use pool::{ClientPool, PoolOptions};
pub use transport::{ClientContext, Connector, ToolCallResult, ToolTransport};
