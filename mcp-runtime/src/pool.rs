use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::{DEFAULT_IDLE_THRESHOLD, ToolClient};
use crate::error::ClientError;
use crate::transport::{ClientContext, Connector};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Clients idle longer than this are evicted by the sweep.
    pub idle_threshold: Duration,
    pub sweep_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Per-session creation guard. Concurrent first requests for one key await
/// the same cell, so only one of them connects.
type Slot = Arc<OnceCell<Arc<ToolClient>>>;

/// Registry of tool clients keyed by session.
///
/// The map lock is only held for lookups and removals, never across a
/// connect or close, so unrelated sessions do not serialize on each other.
pub struct ClientPool {
    connector: Arc<dyn Connector>,
    options: PoolOptions,
    clients: Mutex<HashMap<String, Slot>>,
}

impl ClientPool {
    pub fn new(connector: Arc<dyn Connector>, options: PoolOptions) -> Self {
        Self {
            connector,
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> PoolOptions {
        self.options
    }

    /// Return the session's client, creating and connecting it on first use.
    pub async fn get(
        &self,
        session_key: &str,
        client_address: Option<&str>,
    ) -> Result<Arc<ToolClient>, ClientError> {
        let slot = self
            .lock()
            .entry(session_key.to_string())
            .or_default()
            .clone();

        let created = slot
            .get_or_try_init(|| async {
                let context = ClientContext::new(session_key, client_address.map(str::to_string));
                let client = Arc::new(ToolClient::new(
                    context,
                    self.connector.clone(),
                    self.options.idle_threshold,
                ));
                client.connect().await?;
                tracing::info!(
                    event = "tool_client_created",
                    session_key = %session_key,
                    client_address = client_address.unwrap_or("-"),
                );
                Ok::<_, ClientError>(client)
            })
            .await;

        match created {
            Ok(client) => {
                client.touch();
                Ok(client.clone())
            }
            Err(err) => {
                let mut clients = self.lock();
                let is_current = clients
                    .get(session_key)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot));
                if is_current && !slot.initialized() {
                    clients.remove(session_key);
                }
                Err(err)
            }
        }
    }

    /// Close and remove every expired client. Returns how many were evicted.
    pub async fn sweep_expired(&self) -> usize {
        let mut expired = Vec::new();
        self.lock().retain(|key, slot| match slot.get() {
            Some(client) if client.is_expired() => {
                expired.push((key.clone(), client.clone()));
                false
            }
            _ => true,
        });

        for (session_key, client) in &expired {
            client.close().await;
            tracing::info!(
                event = "tool_client_evicted",
                session_key = %session_key,
                idle_secs = client.idle_for().as_secs(),
            );
        }
        expired.len()
    }

    /// Periodically evict idle clients until the pool is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let period = self.options.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let evicted = pool.sweep_expired().await;
                tracing::debug!(
                    event = "tool_client_sweep",
                    evicted,
                    remaining = pool.len(),
                );
            }
        })
    }

    /// Number of sessions with a live or in-flight client.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, session_key: &str) -> bool {
        self.lock().contains_key(session_key)
    }

    /// Close every client. Used on graceful shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<Slot> = self.lock().drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            if let Some(client) = slot.get() {
                client.close().await;
            }
        }
        tracing::info!(event = "tool_client_pool_shutdown", closed = count);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.clients
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
