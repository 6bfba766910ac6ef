//! Shared fixtures for the integration tests.
//!
//! `MockTransport` is an in-memory [`Transport`] whose far end is a
//! [`MockLink`] the test keeps: it records every outbound frame, injects
//! inbound frames, can refuse or drop connections, and can hold a single
//! outbound send until the test releases it.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use market_stream_mux::domain::streaming::PING_FRAME;
use market_stream_mux::infrastructure::exchange::{HeartbeatConfig, ReconnectConfig};
use market_stream_mux::{
    ConnectionState, Listener, StreamMultiplexer, SupervisorConfig, Transport, TransportError,
    TransportEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

// =============================================================================
// Mock Transport
// =============================================================================

/// Test-side view of the mock connection.
#[derive(Default)]
pub struct MockLink {
    sent: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    refuse: AtomicBool,
    gate_armed: AtomicBool,
    gate_held: AtomicBool,
    gate: Notify,
}

impl MockLink {
    /// Every frame written so far, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Forget recorded frames.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Subscription objects of the control frames with `method`.
    pub fn control_frames(&self, method: &str) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter(|frame| frame["method"] == method)
            .map(|frame| frame["subscription"].clone())
            .collect()
    }

    /// `(method, subscription)` of every control frame, pings excluded.
    pub fn control_log(&self) -> Vec<(String, Value)> {
        self.sent()
            .iter()
            .filter(|text| text.as_str() != PING_FRAME)
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .map(|frame| {
                (
                    frame["method"].as_str().unwrap_or_default().to_string(),
                    frame["subscription"].clone(),
                )
            })
            .collect()
    }

    /// Keepalive pings written so far.
    pub fn pings(&self) -> usize {
        self.sent()
            .iter()
            .filter(|text| text.as_str() == PING_FRAME)
            .count()
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Open connections closed by the supervisor so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Hold the next send, after recording it, until [`Self::release_gate`].
    pub fn arm_gate(&self) {
        self.gate_armed.store(true, Ordering::SeqCst);
    }

    /// Whether a send is currently held.
    pub fn is_gate_held(&self) -> bool {
        self.gate_held.load(Ordering::SeqCst)
    }

    /// Let the held send return.
    pub fn release_gate(&self) {
        self.gate.notify_one();
    }

    /// Make subsequent connect attempts fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Deliver a text frame on the open connection.
    pub fn push(&self, frame: &str) {
        self.emit(TransportEvent::Frame(frame.to_string()));
    }

    /// Deliver a JSON data frame on the open connection.
    pub fn push_data(&self, channel: &str, data: &Value) {
        self.push(&serde_json::json!({ "channel": channel, "data": data }).to_string());
    }

    /// Close the open connection from the far end.
    pub fn drop_connection(&self) {
        self.emit(TransportEvent::Closed {
            reason: "dropped by test".to_string(),
        });
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

/// In-memory transport handed to the supervisor.
pub struct MockTransport {
    link: Arc<MockLink>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<MockLink>) {
        let link = Arc::new(MockLink::default());
        let transport = Self {
            link: Arc::clone(&link),
            inbound: None,
        };
        (transport, link)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.link.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("refused by test".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.link.inbound.lock() = Some(tx);
        self.inbound = Some(rx);
        self.link.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.inbound.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.link.sent.lock().push(frame);
        if self.link.gate_armed.swap(false, Ordering::SeqCst) {
            self.link.gate_held.store(true, Ordering::SeqCst);
            self.link.gate.notified().await;
            self.link.gate_held.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.inbound.as_mut() {
            Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Closed {
                reason: "link gone".to_string(),
            }),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if self.inbound.take().is_some() {
            self.link.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.link.inbound.lock().take();
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Short delays so reconnect tests finish quickly; pings effectively off.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        heartbeat: HeartbeatConfig::new(Duration::from_secs(600), 2),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter_factor: 0.0,
            stability_window: Duration::from_secs(10),
        },
        connect_timeout: Duration::from_secs(1),
    }
}

/// Spawn a multiplexer over a fresh mock and wait for it to connect.
pub async fn connected_mux(config: SupervisorConfig) -> (StreamMultiplexer, Arc<MockLink>, JoinHandle<()>) {
    let (transport, link) = MockTransport::new();
    let (mux, task) = StreamMultiplexer::spawn(config, transport);
    assert!(
        eventually(|| mux.connection_state() == ConnectionState::Connected).await,
        "multiplexer never connected"
    );
    (mux, link, task)
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Give the supervisor time to emit anything it was going to emit.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Listener that counts invocations.
pub fn counting_listener() -> (Listener, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let listener = Listener::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (listener, count)
}

/// Current value of a counter.
pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
