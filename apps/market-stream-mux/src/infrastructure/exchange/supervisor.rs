//! Connection Supervisor
//!
//! Actor task that owns the [`Transport`] and drives the connection
//! lifecycle:
//!
//! ```text
//! Disconnected ──run()──▶ Connecting ──open──▶ Connected
//!                              │                  │ close / error / heartbeat timeout
//!                              ▼                  ▼
//!                         Reconnecting ◀──backoff──┘
//! ```
//!
//! # Wire bookkeeping
//!
//! The supervisor remembers the exact subscription object it put on the
//! wire for each key. Unsubscribes and identity rebinds reuse that object,
//! so the exchange always sees the parameterisation it was given. Keys that
//! resolve to the same object share one wire subscription (see
//! [`WireLedger`]). The ledger is cleared whenever the connection drops.
//!
//! # Reconnect
//!
//! After every reconnect the supervisor replays a snapshot of the active
//! keys before touching any queued or new command. Commands received while
//! disconnected are queued, keeping only the latest per key, and flushed
//! after the replay; entries the replay or the current registry state made
//! redundant are skipped.
//!
//! Listener callbacks run on this task, so per-key delivery order equals
//! receive order. Callbacks must not block.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::wire::{Detached, WireLedger};
use crate::application::ports::{
    CommandReceiver, ControlCommand, Transport, TransportError, TransportEvent,
};
use crate::application::services::{
    IdentityContext, MessageRouter, RouteOutcome, SubscriptionRegistry,
};
use crate::domain::connection::ConnectionState;
use crate::domain::streaming::{ControlFrame, PING_FRAME};
use crate::domain::subscription::SubscriptionKey;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Keepalive settings.
    pub heartbeat: HeartbeatConfig,
    /// Backoff settings.
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl SupervisorConfig {
    /// Create configuration from [`StreamSettings`].
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
            reconnect: ReconnectConfig::from_stream_settings(settings),
            connect_timeout: settings.connect_timeout,
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Owner of the upstream connection.
pub struct ConnectionSupervisor<T: Transport> {
    config: SupervisorConfig,
    transport: T,
    registry: Arc<SubscriptionRegistry>,
    identity: Arc<IdentityContext>,
    router: MessageRouter,
    commands: CommandReceiver,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
    pending: HashMap<SubscriptionKey, ControlCommand>,
    on_wire: WireLedger,
    has_connected: bool,
}

impl<T: Transport> ConnectionSupervisor<T> {
    /// Wire a supervisor to its collaborators.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        transport: T,
        registry: Arc<SubscriptionRegistry>,
        identity: Arc<IdentityContext>,
        commands: CommandReceiver,
        state_tx: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        let router = MessageRouter::new(Arc::clone(&registry), Arc::clone(&identity));
        Self {
            config,
            transport,
            registry,
            identity,
            router,
            commands,
            state_tx,
            cancel,
            policy,
            pending: HashMap::new(),
            on_wire: WireLedger::new(),
            has_connected: false,
        }
    }

    /// Run until cancelled. Connection failures are retried forever.
    pub async fn run(mut self) {
        tracing::info!("Connection supervisor starting");
        self.set_state(ConnectionState::Connecting);
        let connect_timeout = self.config.connect_timeout;

        loop {
            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = tokio::time::timeout(connect_timeout, self.transport.connect()) => {
                    result.unwrap_or(Err(TransportError::Timeout(connect_timeout)))
                }
            };

            match connected {
                Ok(()) => {
                    let connected_at = Instant::now();
                    match self.run_session().await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            let uptime = connected_at.elapsed();
                            tracing::warn!(
                                reason = %reason,
                                uptime_ms = uptime.as_millis(),
                                "Connection lost"
                            );
                            if self.policy.record_uptime(uptime) {
                                tracing::debug!("Connection was stable, backoff reset");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Connect attempt failed");
                }
            }

            self.on_wire.clear();
            self.registry.reset_wire_states();
            self.transport.close().await;
            self.set_state(ConnectionState::Reconnecting);

            let delay = self.policy.next_delay();
            let attempt = self.policy.attempt_count();
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to exchange stream"
            );

            if !self.wait_backoff(delay).await {
                break;
            }
        }

        self.transport.close().await;
        self.on_wire.clear();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Connection supervisor stopped");
    }

    /// Sleep out the backoff, queueing commands meanwhile.
    ///
    /// Returns false on shutdown.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.queue(command),
                    None => return false,
                },
            }
        }
    }

    /// Hold a command until the next session. Only the latest command per
    /// key matters. Rebinds are dropped: nothing is on the wire yet, and
    /// every subscribe resolves the identity current at send time.
    fn queue(&mut self, command: ControlCommand) {
        if let ControlCommand::Rebind(key) = &command {
            tracing::trace!(key = %key, "Dropping rebind queued while disconnected");
            return;
        }
        tracing::trace!(command = command.kind(), key = %command.key(), "Queueing control command while disconnected");
        self.pending.insert(command.key().clone(), command);
    }

    async fn run_session(&mut self) -> SessionEnd {
        let is_reconnect = std::mem::replace(&mut self.has_connected, true);
        self.set_state(ConnectionState::Connected);

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );

        let end = self
            .drive_session(is_reconnect, &heartbeat_state, &mut heartbeat_rx)
            .await;
        heartbeat_cancel.cancel();
        end
    }

    async fn drive_session(
        &mut self,
        is_reconnect: bool,
        heartbeat: &HeartbeatState,
        heartbeat_rx: &mut mpsc::Receiver<HeartbeatEvent>,
    ) -> SessionEnd {
        if is_reconnect && let Err(e) = self.replay().await {
            return SessionEnd::Lost(e.to_string());
        }
        if let Err(e) = self.flush_pending().await {
            return SessionEnd::Lost(e.to_string());
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return SessionEnd::Shutdown,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = self.apply(command, false).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                event = self.transport.next_event() => match event {
                    TransportEvent::Frame(text) => {
                        heartbeat.record_activity();
                        self.handle_frame(&text);
                    }
                    TransportEvent::Closed { reason } => return SessionEnd::Lost(reason),
                    TransportEvent::Errored(e) => return SessionEnd::Lost(e.to_string()),
                },
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        heartbeat.mark_ping_sent();
                        if let Err(e) = self.transport.send(PING_FRAME.to_string()).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                        metrics::record_ping_sent();
                    }
                    HeartbeatEvent::Timeout => {
                        return SessionEnd::Lost("heartbeat timeout".to_string());
                    }
                },
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        metrics::record_frame_received();
        match self.router.route(text) {
            RouteOutcome::Delivered { report, .. } if report.panicked > 0 => {
                metrics::record_listener_panics(u64::try_from(report.panicked).unwrap_or(u64::MAX));
            }
            RouteOutcome::Malformed(_) => metrics::record_frame_dropped(DropReason::Malformed),
            RouteOutcome::Unmatched { .. } => metrics::record_frame_dropped(DropReason::Unmatched),
            RouteOutcome::Delivered { .. }
            | RouteOutcome::Pong
            | RouteOutcome::Acknowledged { .. }
            | RouteOutcome::ServerError(_) => {}
        }
    }

    /// Re-send every key that is still active after a reconnect.
    async fn replay(&mut self) -> Result<(), TransportError> {
        let snapshot = self.registry.all_active_keys();
        let mut replayed = 0_u64;
        let mut skipped = 0_u64;

        for key in snapshot {
            if !self.registry.is_active(&key) {
                tracing::debug!(key = %key, "Skipping replay for released subscription");
                skipped += 1;
                continue;
            }
            if self.on_wire.contains(&key) {
                continue;
            }
            self.put_on_wire(key).await?;
            replayed += 1;
        }

        metrics::record_replayed(replayed);
        tracing::info!(replayed, skipped, "Replayed active subscriptions");
        Ok(())
    }

    async fn flush_pending(&mut self) -> Result<(), TransportError> {
        // Anything already in the channel predates this session.
        while let Ok(command) = self.commands.try_recv() {
            self.queue(command);
        }
        if self.pending.is_empty() {
            return Ok(());
        }

        let queued = std::mem::take(&mut self.pending);
        tracing::debug!(count = queued.len(), "Flushing queued control commands");
        for command in queued.into_values() {
            self.apply(command, true).await?;
        }
        Ok(())
    }

    /// Execute one command against the wire.
    ///
    /// `coalesce` is set for commands queued while disconnected: they are
    /// checked against the current registry state, which may have moved on.
    async fn apply(&mut self, command: ControlCommand, coalesce: bool) -> Result<(), TransportError> {
        match command {
            ControlCommand::Subscribe(key) => {
                if self.on_wire.contains(&key) {
                    tracing::trace!(key = %key, "Subscription already on the wire");
                } else if coalesce && !self.registry.is_active(&key) {
                    tracing::debug!(key = %key, "Dropping queued subscribe for released key");
                } else {
                    self.put_on_wire(key).await?;
                }
            }
            ControlCommand::Unsubscribe(key) => {
                if coalesce && self.registry.is_active(&key) {
                    tracing::debug!(key = %key, "Dropping queued unsubscribe for re-activated key");
                } else {
                    match self.on_wire.detach(&key) {
                        Detached::Last(subscription) => {
                            self.send_control(ControlFrame::unsubscribe(subscription)).await?;
                        }
                        Detached::Shared => {
                            tracing::debug!(key = %key, "Wire subscription still held by another key");
                        }
                        Detached::Absent => {
                            tracing::trace!(key = %key, "Subscription not on the wire");
                        }
                    }
                }
            }
            ControlCommand::Rebind(key) => self.rebind(key).await?,
        }

        metrics::set_subscriptions(self.registry.stats());
        Ok(())
    }

    /// Swap the wire parameterisation of an identity-scoped key.
    async fn rebind(&mut self, key: SubscriptionKey) -> Result<(), TransportError> {
        let Some(previous) = self.on_wire.get(&key).cloned() else {
            tracing::trace!(key = %key, "Rebind for key not on the wire");
            return Ok(());
        };
        let next = key.resolve(&self.identity.current());
        if previous == next {
            tracing::trace!(key = %key, "Wire parameterisation already current");
            return Ok(());
        }

        self.registry.mark_unsent(&key);
        if let Detached::Last(stale) = self.on_wire.detach(&key) {
            self.send_control(ControlFrame::unsubscribe(stale)).await?;
        }

        if self.registry.is_active(&key) {
            tracing::debug!(key = %key, "Rebinding identity-scoped subscription");
            self.put_on_wire(key).await?;
            metrics::record_rebind();
        }
        Ok(())
    }

    async fn put_on_wire(&mut self, key: SubscriptionKey) -> Result<(), TransportError> {
        let subscription = key.resolve(&self.identity.current());
        let (first, moved) = self.on_wire.attach(key.clone(), subscription.clone());
        if let Detached::Last(stale) = moved {
            self.send_control(ControlFrame::unsubscribe(stale)).await?;
        }
        if first {
            self.send_control(ControlFrame::subscribe(subscription)).await?;
        } else {
            tracing::debug!(key = %key, "Wire subscription shared with another key");
        }
        self.registry.mark_sent(&key);
        Ok(())
    }

    async fn send_control(&mut self, frame: ControlFrame) -> Result<(), TransportError> {
        let text = frame
            .to_json()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        tracing::debug!(
            method = frame.method.as_str(),
            subscription = %frame.subscription,
            "Sending control frame"
        );
        self.transport.send(text).await?;
        metrics::record_control_frame(frame.method);
        Ok(())
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = *self.state_tx.borrow();
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            tracing::warn!(from = %previous, to = %next, "Unexpected connection state transition");
        }

        self.state_tx.send_replace(next);
        metrics::set_connection_state(next);
        tracing::info!(from = %previous, to = %next, "Connection state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::command_channel;
    use crate::domain::subscription::Params;

    struct IdleTransport;

    #[async_trait::async_trait]
    impl Transport for IdleTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }

        async fn send(&mut self, _frame: String) -> Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }

        async fn next_event(&mut self) -> TransportEvent {
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    fn idle_supervisor() -> ConnectionSupervisor<IdleTransport> {
        let (command_tx, command_rx) = command_channel();
        let registry = Arc::new(SubscriptionRegistry::new(command_tx));
        let identity = Arc::new(IdentityContext::new(Arc::clone(&registry)));
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        ConnectionSupervisor::new(
            SupervisorConfig::default(),
            IdleTransport,
            registry,
            identity,
            command_rx,
            state_tx,
            CancellationToken::new(),
        )
    }

    fn book(coin: &str) -> SubscriptionKey {
        SubscriptionKey::new("l2Book", Params::new().with("coin", coin))
    }

    #[test]
    fn queue_keeps_latest_command_per_key() {
        let mut supervisor = idle_supervisor();

        for _ in 0..1_000 {
            supervisor.queue(ControlCommand::Subscribe(book("BTC")));
            supervisor.queue(ControlCommand::Unsubscribe(book("BTC")));
        }
        supervisor.queue(ControlCommand::Subscribe(book("ETH")));

        assert_eq!(supervisor.pending.len(), 2);
        assert_eq!(
            supervisor.pending.get(&book("BTC")),
            Some(&ControlCommand::Unsubscribe(book("BTC")))
        );
        assert_eq!(
            supervisor.pending.get(&book("ETH")),
            Some(&ControlCommand::Subscribe(book("ETH")))
        );
    }

    #[test]
    fn queue_drops_rebinds() {
        let mut supervisor = idle_supervisor();
        let scoped = SubscriptionKey::new("webData2", Params::new().with_active_user());

        supervisor.queue(ControlCommand::Subscribe(scoped.clone()));
        supervisor.queue(ControlCommand::Rebind(scoped.clone()));

        assert_eq!(
            supervisor.pending.get(&scoped),
            Some(&ControlCommand::Subscribe(scoped))
        );
    }
}
