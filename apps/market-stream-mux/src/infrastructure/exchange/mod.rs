//! Exchange Stream Adapters
//!
//! Connection machinery for the exchange market data WebSocket:
//!
//! - **Transport**: `tokio-tungstenite` implementation of the transport port
//! - **Supervisor**: lifecycle actor with heartbeat, backoff and replay
//! - **Multiplexer**: public facade wiring registry, identity and supervisor
//!
//! # Stream URL
//!
//! - Mainnet: `wss://api.hyperliquid.xyz/ws`
//! - Testnet: `wss://api.hyperliquid-testnet.xyz/ws`

pub mod heartbeat;
pub mod multiplexer;
pub mod reconnect;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use multiplexer::StreamMultiplexer;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
pub use transport::WebSocketTransport;
pub use wire::{Detached, WireLedger};
