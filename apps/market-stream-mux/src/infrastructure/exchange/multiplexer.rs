//! Stream Multiplexer
//!
//! Public entry point. One instance owns one upstream connection and any
//! number of in-process listeners. Instances are independent; there is no
//! global state.
//!
//! # Example
//!
//! ```rust,no_run
//! use market_stream_mux::{
//!     Listener, Params, StreamMultiplexer, SupervisorConfig, WebSocketTransport,
//! };
//!
//! # async fn example() {
//! let transport = WebSocketTransport::new("wss://api.hyperliquid.xyz/ws");
//! let (mux, _task) = StreamMultiplexer::spawn(SupervisorConfig::default(), transport);
//!
//! let handle = mux.subscribe(
//!     "l2Book",
//!     Params::new().with("coin", "BTC"),
//!     Listener::new(|book| println!("{book}")),
//! );
//!
//! // Dropping the handle releases the subscription.
//! drop(handle);
//! mux.shutdown();
//! # }
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::supervisor::{ConnectionSupervisor, SupervisorConfig};
use crate::application::ports::{Transport, command_channel};
use crate::application::services::{
    IdentityContext, RegistryStats, SubscriptionHandle, SubscriptionRegistry,
};
use crate::domain::connection::ConnectionState;
use crate::domain::identity::IdentityBinding;
use crate::domain::subscription::{Listener, Params, ParamsError, SubscriptionKey};

struct MuxInner {
    registry: Arc<SubscriptionRegistry>,
    identity: Arc<IdentityContext>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl Drop for MuxInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to one multiplexed upstream connection.
///
/// Cheap to clone. The supervisor stops when [`shutdown`](Self::shutdown)
/// is called or the last clone is dropped.
#[derive(Clone)]
pub struct StreamMultiplexer {
    inner: Arc<MuxInner>,
}

impl std::fmt::Debug for StreamMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("state", &*self.inner.state_rx.borrow())
            .field("stats", &self.inner.registry.stats())
            .finish_non_exhaustive()
    }
}

impl StreamMultiplexer {
    /// Build a multiplexer and its (not yet running) supervisor.
    #[must_use]
    pub fn new<T: Transport>(
        config: SupervisorConfig,
        transport: T,
    ) -> (Self, ConnectionSupervisor<T>) {
        let (command_tx, command_rx) = command_channel();
        let registry = Arc::new(SubscriptionRegistry::new(command_tx));
        let identity = Arc::new(IdentityContext::new(Arc::clone(&registry)));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let supervisor = ConnectionSupervisor::new(
            config,
            transport,
            Arc::clone(&registry),
            Arc::clone(&identity),
            command_rx,
            state_tx,
            cancel.clone(),
        );

        let mux = Self {
            inner: Arc::new(MuxInner {
                registry,
                identity,
                state_rx,
                cancel,
            }),
        };
        (mux, supervisor)
    }

    /// Build a multiplexer and spawn its supervisor on the current runtime.
    pub fn spawn<T: Transport>(config: SupervisorConfig, transport: T) -> (Self, JoinHandle<()>) {
        let (mux, supervisor) = Self::new(config, transport);
        let task = tokio::spawn(supervisor.run());
        (mux, task)
    }

    /// Attach `listener` to `(channel, params)`.
    ///
    /// The first listener on a key puts it on the wire; the returned handle
    /// releases the registration when dropped.
    pub fn subscribe(&self, channel: &str, params: Params, listener: Listener) -> SubscriptionHandle {
        self.inner
            .registry
            .subscribe(SubscriptionKey::new(channel, params), listener)
    }

    /// Attach `listener` using a wire-style subscription object such as
    /// `{"type":"candle","coin":"BTC","interval":"1m"}`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError`] if the object is not a valid subscription.
    pub fn subscribe_json(
        &self,
        subscription: &Value,
        listener: Listener,
    ) -> Result<SubscriptionHandle, ParamsError> {
        let key = SubscriptionKey::from_subscription(subscription)?;
        Ok(self.inner.registry.subscribe(key, listener))
    }

    /// Detach `listener` from `(channel, params)`. Unknown pairs are ignored.
    pub fn unsubscribe(&self, channel: &str, params: &Params, listener: &Listener) -> bool {
        let key = SubscriptionKey::new(channel, params.clone());
        self.inner.registry.unsubscribe(&key, listener.id())
    }

    /// Attach `listener` to an always-on event such as `webData2` or
    /// `allMids`. Identity-scoped events follow the active identity.
    pub fn add_listener(&self, event: &str, listener: Listener) -> SubscriptionHandle {
        self.subscribe(event, Params::for_event(event), listener)
    }

    /// Detach `listener` from an always-on event.
    pub fn remove_listener(&self, event: &str, listener: &Listener) -> bool {
        self.unsubscribe(event, &Params::for_event(event), listener)
    }

    /// Change the active identity. Returns false if unchanged.
    pub fn update_active_identity(&self, address: Option<&str>) -> bool {
        self.inner.identity.set_active_identity(address)
    }

    /// Current identity binding.
    #[must_use]
    pub fn active_identity(&self) -> IdentityBinding {
        self.inner.identity.current()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Registry size snapshot.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner.registry.stats()
    }

    /// Listeners attached to `(channel, params)`.
    #[must_use]
    pub fn ref_count(&self, channel: &str, params: &Params) -> usize {
        self.inner
            .registry
            .ref_count(&SubscriptionKey::new(channel, params.clone()))
    }

    /// Stop the supervisor and close the connection.
    pub fn shutdown(&self) {
        tracing::info!("Stream multiplexer shutting down");
        self.inner.cancel.cancel();
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}
