//! Shared fixtures for router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use portrait_mcp_runtime::{
    ClientContext, ClientPool, Connector, HostedLinkApi, ToolCallResult, ToolTransport,
    TransportError,
};
use serde_json::{Map, Value};

use crate::config::Settings;
use crate::middleware::session::SessionKeys;
use crate::services::analytics::Analytics;
use crate::services::geolocation::Geolocator;
use crate::state::AppState;

/// Answers tool calls from a fixed table. Unknown tools fail with an RPC error.
#[derive(Default)]
pub struct ScriptedConnector {
    replies: Mutex<HashMap<String, ToolCallResult>>,
    connects: AtomicUsize,
    calls: Arc<Mutex<Vec<(String, Map<String, Value>)>>>,
    addresses: Mutex<Vec<Option<String>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, tool: &str, payload: Value) -> Self {
        self.reply_with(tool, ToolCallResult::structured(payload))
    }

    pub fn reply_with(self, tool: &str, result: ToolCallResult) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(tool.to_string(), result);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn addresses(&self) -> Vec<Option<String>> {
        self.addresses.lock().unwrap().clone()
    }
}

struct ScriptedTransport {
    replies: HashMap<String, ToolCallResult>,
    calls: Arc<Mutex<Vec<(String, Map<String, Value>)>>>,
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        self.replies
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::Rpc {
                code: -32602,
                message: format!("unknown tool {name}"),
            })
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        context: &ClientContext,
    ) -> Result<Arc<dyn ToolTransport>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.addresses
            .lock()
            .unwrap()
            .push(context.client_address.clone());
        Ok(Arc::new(ScriptedTransport {
            replies: self.replies.lock().unwrap().clone(),
            calls: self.calls.clone(),
        }))
    }
}

pub fn test_settings(upstream: &str) -> Settings {
    let upstream = upstream.to_string();
    Settings::from_lookup(|name| match name {
        "GETGATHER_URL" => Some(upstream.clone()),
        "PORTRAIT_TOOL_MAX_RETRIES" => Some("0".to_string()),
        _ => None,
    })
    .expect("test settings are valid")
}

/// State whose tool service is `upstream` and whose tools answer nothing.
pub fn test_state(upstream: &str) -> AppState {
    test_state_with(upstream, Arc::new(ScriptedConnector::new()))
}

pub fn test_state_with(upstream: &str, connector: Arc<dyn Connector>) -> AppState {
    let settings = test_settings(upstream);
    let http = reqwest::Client::new();
    AppState {
        pool: Arc::new(ClientPool::new(connector, settings.pool_options())),
        links: HostedLinkApi::new(http.clone(), &settings.getgather_url),
        sessions: SessionKeys::new(b"test-session-secret", false),
        geo: Arc::new(Geolocator::new(http.clone(), None)),
        analytics: Analytics::new(http.clone(), None),
        portraits: None,
        http,
        settings: Arc::new(settings),
    }
}

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener has an address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("upstream should run");
    });
    format!("http://{addr}")
}
