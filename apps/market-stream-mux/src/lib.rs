#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream Mux - WebSocket Subscription Multiplexer
//!
//! Keeps one WebSocket connection to the exchange market data feed and
//! shares it between any number of in-process listeners. Subscriptions are
//! reference counted, replayed after reconnects and re-parameterised when
//! the active wallet identity changes.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Pure data types
//!   - `subscription`: Keys, parameters, listeners and the reference table
//!   - `identity`: Active wallet binding and the unbound sentinel
//!   - `connection`: Connection lifecycle states
//!   - `streaming`: Wire frames and typed payloads
//!
//! - **Application**: Ports and services
//!   - `ports`: Transport trait and supervisor command channel
//!   - `services`: Subscription registry, message router, identity context
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `exchange`: WebSocket transport, connection supervisor, facade
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!  listeners ──subscribe──► Registry ──commands──► Supervisor ──frames──► Exchange WS
//!      ▲                                              │
//!      └──────────── dispatch ◄──── Router ◄──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::identity::{IdentityBinding, NO_IDENTITY};
pub use domain::subscription::{
    Listener, ListenerId, ParamValue, Params, ParamsError, SubscriptionKey,
};

// Ports and services
pub use application::ports::{Transport, TransportError, TransportEvent};
pub use application::services::{RegistryStats, SubscriptionHandle};

// Exchange adapters
pub use infrastructure::exchange::{
    ConnectionSupervisor, StreamMultiplexer, SupervisorConfig, WebSocketTransport,
};

// Configuration
pub use infrastructure::config::{
    ConfigError, DemoSettings, MuxConfig, Network, ServerSettings, StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
