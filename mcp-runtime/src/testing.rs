//! Scriptable in-memory connector used by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::transport::{ClientContext, Connector, ToolCallResult, ToolTransport};

type Responder =
    dyn Fn(&str, &Map<String, Value>) -> Result<ToolCallResult, TransportError> + Send + Sync;

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    calls: AtomicUsize,
    closes: AtomicUsize,
}

pub(crate) struct FakeConnector {
    counters: Arc<Counters>,
    failing_calls: Arc<AtomicUsize>,
    grace_connects: AtomicUsize,
    failing_connects: AtomicUsize,
    connect_delay: Duration,
    call_delay: Duration,
    responder: Arc<Responder>,
}

impl FakeConnector {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> Result<ToolCallResult, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            counters: Arc::default(),
            failing_calls: Arc::default(),
            grace_connects: AtomicUsize::new(0),
            failing_connects: AtomicUsize::new(0),
            connect_delay: Duration::ZERO,
            call_delay: Duration::ZERO,
            responder: Arc::new(responder),
        }
    }

    pub(crate) fn replying(payload: Value) -> Self {
        Self::new(move |_, _| Ok(ToolCallResult::structured(payload.clone())))
    }

    /// The next `n` tool calls fail with HTTP 502.
    pub(crate) fn failing_calls(self, n: usize) -> Self {
        self.failing_calls.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_connects(self, n: usize) -> Self {
        self.failing_connects.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_connects_after_first(self, n: usize) -> Self {
        self.grace_connects.store(1, Ordering::SeqCst);
        self.failing_connects(n)
    }

    pub(crate) fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub(crate) fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub(crate) fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _context: &ClientContext,
    ) -> Result<Arc<dyn ToolTransport>, TransportError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if !take_one(&self.grace_connects) && take_one(&self.failing_connects) {
            return Err(TransportError::Status(503));
        }
        Ok(Arc::new(FakeTransport {
            counters: self.counters.clone(),
            failing_calls: self.failing_calls.clone(),
            call_delay: self.call_delay,
            responder: self.responder.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeTransport {
    counters: Arc<Counters>,
    failing_calls: Arc<AtomicUsize>,
    call_delay: Duration,
    responder: Arc<Responder>,
    closed: AtomicBool,
}

#[async_trait]
impl ToolTransport for FakeTransport {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, TransportError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if take_one(&self.failing_calls) {
            return Err(TransportError::Status(502));
        }
        (self.responder)(name, &arguments)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
