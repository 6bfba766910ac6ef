//! Heartbeat Manager
//!
//! Application-level keepalive for the upstream connection. The exchange
//! answers `{"method":"ping"}` with a `pong` frame; any inbound frame counts
//! as proof of life. After `max_missed_pongs` consecutive pings go
//! unanswered the connection is declared dead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Consecutive unanswered pings that declare the connection dead.
    pub max_missed_pongs: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            max_missed_pongs: 2,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, max_missed_pongs: u32) -> Self {
        Self {
            ping_interval,
            max_missed_pongs,
        }
    }

    /// Create configuration from [`StreamSettings`].
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            max_missed_pongs: settings.max_missed_pongs,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping now.
    SendPing,
    /// Too many pings went unanswered.
    Timeout,
}

/// Liveness shared between the heartbeat manager and the session loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_seen: RwLock<Instant>,
    outstanding_pings: AtomicU32,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Fresh state for a new connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: RwLock::new(Instant::now()),
            outstanding_pings: AtomicU32::new(0),
        }
    }

    /// Record inbound traffic.
    pub fn record_activity(&self) {
        *self.last_seen.write() = Instant::now();
        self.outstanding_pings.store(0, Ordering::SeqCst);
    }

    /// Record that a ping went out.
    pub fn mark_ping_sent(&self) {
        self.outstanding_pings.fetch_add(1, Ordering::SeqCst);
    }

    /// Pings sent since the last inbound frame.
    #[must_use]
    pub fn outstanding_pings(&self) -> u32 {
        self.outstanding_pings.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_seen.read().elapsed()
    }
}

/// Periodic ping scheduler and dead-connection detector.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or a timeout is reported.
    ///
    /// The first ping goes out one interval after start, not immediately.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check_and_ping().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false once the loop should stop.
    async fn check_and_ping(&self) -> bool {
        let outstanding = self.state.outstanding_pings();
        if outstanding >= self.config.max_missed_pongs {
            tracing::warn!(
                missed = outstanding,
                silent_secs = self.state.time_since_activity().as_secs(),
                "Heartbeat timeout detected"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
            return false;
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return false;
        }
        true
    }
}
