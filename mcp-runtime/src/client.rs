use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::error::{ClientError, TransportError};
use crate::transport::{ClientContext, Connector, ToolCallResult, ToolTransport};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// One logical connection to the tool service, owned by a single session.
///
/// Calls on the same client may run concurrently; correlation is the
/// transport's job. Reconnects swap the transport under a lock so that at
/// most one live transport exists per client.
pub struct ToolClient {
    context: ClientContext,
    connector: Arc<dyn Connector>,
    transport: tokio::sync::Mutex<Option<Arc<dyn ToolTransport>>>,
    last_accessed: Mutex<Instant>,
    idle_threshold: Duration,
}

impl ToolClient {
    pub fn new(
        context: ClientContext,
        connector: Arc<dyn Connector>,
        idle_threshold: Duration,
    ) -> Self {
        Self {
            context,
            connector,
            transport: tokio::sync::Mutex::new(None),
            last_accessed: Mutex::new(Instant::now()),
            idle_threshold,
        }
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        let fresh = self
            .connector
            .connect(&self.context)
            .await
            .map_err(ClientError::Connection)?;
        let previous = self.transport.lock().await.replace(fresh);
        if let Some(previous) = previous {
            close_quietly(&self.context, previous).await;
        }
        self.touch();
        Ok(())
    }

    /// Call `name`, retrying up to `max_retries` more times with a reconnect
    /// between attempts.
    ///
    /// `last_accessed` moves on every attempt, so a session that keeps
    /// failing is still considered active.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        max_retries: u32,
    ) -> Result<ToolCallResult, ClientError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.touch();

            let used = self.current_transport().await;
            let outcome = match &used {
                Some(transport) => transport.call_tool(name, arguments.clone()).await,
                None => Err(TransportError::NotConnected),
            };

            let err = match outcome {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if attempts > max_retries {
                tracing::warn!(
                    event = "tool_call_failed",
                    session_key = %self.context.session_key,
                    tool = %name,
                    attempts,
                    error = %err,
                );
                return Err(ClientError::Invocation {
                    tool: name.to_string(),
                    attempts,
                    source: err,
                });
            }

            tracing::debug!(
                event = "tool_call_retry",
                session_key = %self.context.session_key,
                tool = %name,
                attempt = attempts,
                error = %err,
            );
            if let Err(reconnect_err) = self.replace_transport(used.as_ref()).await {
                tracing::warn!(
                    event = "tool_client_reconnect_failed",
                    session_key = %self.context.session_key,
                    error = %reconnect_err,
                );
            }
        }
    }

    /// Close the current transport (ignoring close errors) and open a new one.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.replace_transport(None).await
    }

    /// Reconnect, unless `stale` is set and the slot already holds a
    /// different transport: a concurrent call replaced it, so retry on that.
    async fn replace_transport(
        &self,
        stale: Option<&Arc<dyn ToolTransport>>,
    ) -> Result<(), ClientError> {
        let mut slot = self.transport.lock().await;
        if let (Some(stale), Some(current)) = (stale, slot.as_ref()) {
            if !std::ptr::addr_eq(Arc::as_ptr(stale), Arc::as_ptr(current)) {
                return Ok(());
            }
        }
        if let Some(previous) = slot.take() {
            close_quietly(&self.context, previous).await;
        }
        self.touch();
        let fresh = self
            .connector
            .connect(&self.context)
            .await
            .map_err(ClientError::Connection)?;
        *slot = Some(fresh);
        drop(slot);
        self.touch();
        Ok(())
    }

    /// Release the transport. Safe to call any number of times.
    pub async fn close(&self) {
        let previous = self.transport.lock().await.take();
        if let Some(previous) = previous {
            close_quietly(&self.context, previous).await;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.idle_for() > self.idle_threshold
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_accessed())
    }

    pub fn last_accessed(&self) -> Instant {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn touch(&self) {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Instant::now();
    }

    async fn current_transport(&self) -> Option<Arc<dyn ToolTransport>> {
        self.transport.lock().await.clone()
    }
}

impl std::fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolClient")
            .field("context", &self.context)
            .field("idle_threshold", &self.idle_threshold)
            .finish_non_exhaustive()
    }
}

async fn close_quietly(context: &ClientContext, transport: Arc<dyn ToolTransport>) {
    if let Err(err) = transport.close().await {
        tracing::debug!(
            event = "tool_transport_close_failed",
            session_key = %context.session_key,
            error = %err,
        );
    }
}
