//! Streamable-HTTP JSON-RPC transport to the remote tool service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value, json};

use crate::error::TransportError;
use crate::transport::{ClientContext, Connector, ToolCallResult, ToolTransport};
use crate::util;

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const CUSTOM_APP_HEADER: &str = "x-getgather-custom-app";
pub const CLIENT_NAME: &str = "data-portrait";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens one Streamable-HTTP session per tool client.
#[derive(Debug, Clone)]
pub struct StreamableHttpConnector {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl StreamableHttpConnector {
    /// `base_url` is the tool-service root; requests go to `{base_url}/mcp`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            http: util::http_client(CONNECT_TIMEOUT)?,
            endpoint: util::endpoint(base_url, "mcp"),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for StreamableHttpConnector {
    async fn connect(
        &self,
        context: &ClientContext,
    ) -> Result<Arc<dyn ToolTransport>, TransportError> {
        let mut transport = StreamableHttpTransport {
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            forwarded_for: context.client_address.clone(),
            session_id: None,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };
        transport.initialize().await?;
        tracing::debug!(
            event = "tool_transport_connected",
            session_key = %context.session_key,
            upstream_session = transport.session_id.as_deref().unwrap_or("-"),
        );
        Ok(Arc::new(transport))
    }
}

pub struct StreamableHttpTransport {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    forwarded_for: Option<String>,
    session_id: Option<String>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    async fn initialize(&mut self) -> Result<(), TransportError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") }
        });
        let (session_id, _result) = self.rpc("initialize", params).await?;
        if session_id.is_some() {
            self.session_id = session_id;
        }
        self.notify("notifications/initialized").await
    }

    fn request(&self, method: Method) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, &self.endpoint)
            .timeout(self.timeout)
            .header(ACCEPT, ACCEPT_BOTH)
            .header(CUSTOM_APP_HEADER, CLIENT_NAME);
        if let Some(session_id) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session_id);
        }
        if let Some(address) = &self.forwarded_for {
            builder = builder.header("x-forwarded-for", address);
        }
        builder
    }

    async fn rpc(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(Option<String>, Value), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .request(Method::POST)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;

        let reply = if is_stream {
            parse_sse_messages(&text)
                .into_iter()
                .find(|message| message_id(message) == Some(id))
        } else {
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|e| TransportError::Protocol(format!("reply is not JSON: {e}")))?;
            match parsed {
                Value::Array(batch) => batch.into_iter().find(|m| message_id(m) == Some(id)),
                single => Some(single),
            }
        };
        let message = reply
            .ok_or_else(|| TransportError::Protocol(format!("no reply for request id {id}")))?;

        Ok((session_id, into_result(message)?))
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let body = json!({ "jsonrpc": "2.0", "method": method });
        let response = self
            .request(Method::POST)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolTransport for StreamableHttpTransport {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, TransportError> {
        let params = json!({ "name": name, "arguments": arguments });
        let (_, result) = self.rpc("tools/call", params).await?;
        serde_json::from_value(result)
            .map_err(|e| TransportError::Protocol(format!("malformed tool result: {e}")))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) || self.session_id.is_none() {
            return Ok(());
        }
        let response = self
            .request(Method::DELETE)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;
        let status = response.status();
        // 405 means the server does not support explicit session termination.
        if status.is_success() || status == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(TransportError::Status(status.as_u16()))
        }
    }
}

/// Split an SSE body into the JSON messages carried by its `data:` lines.
///
/// Multi-line data fields are joined with `\n`; events whose data is not JSON
/// are skipped.
pub fn parse_sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();
    for line in body.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if !data.is_empty() {
                if let Ok(message) = serde_json::from_str(&data) {
                    messages.push(message);
                }
                data.clear();
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    messages
}

fn message_id(message: &Value) -> Option<u64> {
    message.get("id").and_then(Value::as_u64)
}

fn into_result(mut message: Value) -> Result<Value, TransportError> {
    if let Some(error) = message.get("error") {
        return Err(TransportError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    match message.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(TransportError::Protocol(
            "reply has neither result nor error".to_string(),
        )),
    }
}
