//! Prometheus Metrics Module
//!
//! Exposes multiplexer metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames received and dropped, control frames sent
//! - **Connection**: Lifecycle state, reconnects, heartbeat pings
//! - **Subscriptions**: Active keys and listeners, replays, rebinds
//! - **Listeners**: Callback panics caught during dispatch
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::streaming::ControlMethod;
use crate::domain::subscription::TableStats;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once and return its handle.
///
/// Subsequent calls return the existing handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_mux_frames_received_total",
        "Total inbound frames received from the exchange"
    );
    describe_counter!(
        "stream_mux_frames_dropped_total",
        "Total inbound frames dropped by reason"
    );
    describe_counter!(
        "stream_mux_control_frames_sent_total",
        "Total subscribe/unsubscribe frames written"
    );
    describe_counter!("stream_mux_pings_sent_total", "Total keepalive pings sent");

    describe_gauge!(
        "stream_mux_connection_state",
        "Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)"
    );
    describe_counter!(
        "stream_mux_reconnects_total",
        "Total reconnection attempts"
    );

    describe_gauge!("stream_mux_subscriptions", "Active subscription keys");
    describe_gauge!("stream_mux_listeners", "Registered listeners");
    describe_counter!(
        "stream_mux_subscriptions_replayed_total",
        "Subscriptions re-sent after a reconnect"
    );
    describe_counter!(
        "stream_mux_rebinds_total",
        "Identity-scoped subscriptions re-sent after an identity change"
    );

    describe_counter!(
        "stream_mux_listener_panics_total",
        "Listener callbacks that panicked during dispatch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why an inbound frame was not delivered.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Not parseable.
    Malformed,
    /// No active subscription matched.
    Unmatched,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Unmatched => "unmatched",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received() {
    counter!("stream_mux_frames_received_total").increment(1);
}

/// Record a dropped inbound frame.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "stream_mux_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a control frame written to the wire.
pub fn record_control_frame(method: ControlMethod) {
    counter!(
        "stream_mux_control_frames_sent_total",
        "method" => method.as_str()
    )
    .increment(1);
}

/// Record a keepalive ping.
pub fn record_ping_sent() {
    counter!("stream_mux_pings_sent_total").increment(1);
}

/// Publish the connection state.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("stream_mux_connection_state").set(state.as_gauge());
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("stream_mux_reconnects_total").increment(1);
}

/// Publish registry size.
pub fn set_subscriptions(stats: TableStats) {
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!("stream_mux_subscriptions").set(stats.keys as f64);
        gauge!("stream_mux_listeners").set(stats.listeners as f64);
    }
}

/// Record subscriptions replayed after a reconnect.
pub fn record_replayed(count: u64) {
    counter!("stream_mux_subscriptions_replayed_total").increment(count);
}

/// Record an identity rebind on the wire.
pub fn record_rebind() {
    counter!("stream_mux_rebinds_total").increment(1);
}

/// Record listener panics.
pub fn record_listener_panics(count: u64) {
    counter!("stream_mux_listener_panics_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================
