use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Who a connection is opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub session_key: String,
    /// Originating client address, forwarded upstream for location context.
    pub client_address: Option<String>,
}

impl ClientContext {
    pub fn new(session_key: impl Into<String>, client_address: Option<String>) -> Self {
        Self {
            session_key: session_key.into(),
            client_address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Result of a `tools/call` round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn structured(value: Value) -> Self {
        Self {
            content: Vec::new(),
            structured_content: Some(value),
            is_error: false,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            structured_content: None,
            is_error: false,
        }
    }

    /// The value downstream consumers work with.
    ///
    /// Structured content wins; otherwise the first text block, parsed as
    /// JSON when it is JSON and kept as a string when it is not.
    pub fn payload(&self) -> Value {
        if let Some(structured) = &self.structured_content {
            return structured.clone();
        }
        self.first_text()
            .map(|text| {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
            })
            .unwrap_or(Value::Null)
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }
}

/// One live connection to the tool service.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, TransportError>;

    /// Release the connection. Errors are reported but callers may ignore them.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens transports. One connector is shared by every client in a pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, context: &ClientContext)
    -> Result<Arc<dyn ToolTransport>, TransportError>;
}
