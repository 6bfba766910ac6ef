//! Port Interfaces
//!
//! Contracts between the application layer and the connection machinery,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`]: a single full-duplex text-frame connection to the
//!   exchange. The WebSocket adapter implements it for production; tests
//!   substitute an in-memory double.
//!
//! ## Control Queue
//!
//! - [`ControlCommand`]: what the registry and identity context ask the
//!   connection supervisor to put on the wire. Commands are enqueued while
//!   the registry lock is held, so their order matches the order of the
//!   reference-count transitions that produced them.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::subscription::SubscriptionKey;

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connect attempt did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Operation requires an open connection.
    #[error("not connected")]
    NotConnected,

    /// The connection reported a protocol-level error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Frame(String),
    /// The peer closed the connection or the stream ended.
    Closed {
        /// Close reason, for logs.
        reason: String,
    },
    /// The connection failed.
    Errored(TransportError),
}

/// Full-duplex text-frame connection to the exchange.
///
/// The supervisor owns the transport exclusively and drives it from a
/// single task, so implementations need no internal synchronisation.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Open a fresh connection, discarding any previous one.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: the supervisor polls it inside `select!`.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the connection if open.
    async fn close(&mut self);
}

// =============================================================================
// Control Queue
// =============================================================================

/// Wire-level work requested of the connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// A key went 0→1; put it on the wire.
    Subscribe(SubscriptionKey),
    /// A key went 1→0; take it off the wire.
    Unsubscribe(SubscriptionKey),
    /// The active identity changed; re-send an identity-scoped key if the
    /// parameterisation on the wire is stale.
    Rebind(SubscriptionKey),
}

impl ControlCommand {
    /// The key the command concerns.
    #[must_use]
    pub const fn key(&self) -> &SubscriptionKey {
        match self {
            Self::Subscribe(key) | Self::Unsubscribe(key) | Self::Rebind(key) => key,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Rebind(_) => "rebind",
        }
    }
}

/// Sending half of the control queue.
pub type CommandSender = tokio::sync::mpsc::UnboundedSender<ControlCommand>;

/// Receiving half of the control queue.
pub type CommandReceiver = tokio::sync::mpsc::UnboundedReceiver<ControlCommand>;

/// Create a control queue.
#[must_use]
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
