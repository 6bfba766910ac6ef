//! Multiplexer Configuration Settings
//!
//! Configuration types for the stream multiplexer, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults.

use std::time::Duration;

/// Exchange network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Production network.
    #[default]
    Mainnet,
    /// Test network.
    Testnet,
}

impl Network {
    /// Parse network from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "testnet" => Self::Testnet,
            _ => Self::Mainnet,
        }
    }

    /// Network name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }

    /// Default WebSocket endpoint of the network.
    #[must_use]
    pub const fn ws_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "wss://api.hyperliquid.xyz/ws",
            Self::Testnet => "wss://api.hyperliquid-testnet.xyz/ws",
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Keepalive ping interval.
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered pings before the connection is dropped.
    pub max_missed_pongs: u32,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Uptime after which the backoff resets.
    pub stability_window: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pongs: 2,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            stability_window: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// What the demo binary subscribes to.
#[derive(Debug, Clone)]
pub struct DemoSettings {
    /// Coins to follow.
    pub coins: Vec<String>,
    /// Optional wallet address for identity-scoped channels.
    pub user: Option<String>,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            coins: vec!["BTC".to_string(), "ETH".to_string()],
            user: None,
        }
    }
}

/// Complete multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Exchange network.
    pub network: Network,
    /// WebSocket endpoint.
    pub ws_url: String,
    /// Upstream connection settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Demo subscriptions.
    pub demo: DemoSettings,
}

impl MuxConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `STREAM_MUX_WS_URL` is not a `ws://`/`wss://` URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket URL override is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network = lookup("STREAM_MUX_NETWORK")
            .map(|s| Network::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let ws_url = match lookup("STREAM_MUX_WS_URL").filter(|s| !s.trim().is_empty()) {
            Some(url) => validate_ws_url(url.trim())?,
            None => network.ws_url().to_string(),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "STREAM_MUX_PING_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            max_missed_pongs: parse_or(
                &lookup,
                "STREAM_MUX_MAX_MISSED_PONGS",
                defaults.max_missed_pongs,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "STREAM_MUX_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "STREAM_MUX_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "STREAM_MUX_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            stability_window: parse_duration_secs(
                &lookup,
                "STREAM_MUX_STABILITY_WINDOW_SECS",
                defaults.stability_window,
            ),
            connect_timeout: parse_duration_secs(
                &lookup,
                "STREAM_MUX_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
        };

        let server = ServerSettings {
            health_port: parse_or(
                &lookup,
                "STREAM_MUX_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let demo = DemoSettings {
            coins: lookup("STREAM_MUX_COINS")
                .map(|s| parse_coins(&s))
                .filter(|coins| !coins.is_empty())
                .unwrap_or_else(|| DemoSettings::default().coins),
            user: lookup("STREAM_MUX_USER").filter(|s| !s.trim().is_empty()),
        };

        Ok(Self {
            network,
            ws_url,
            stream,
            server,
            demo,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// WebSocket URL override is not usable.
    #[error("invalid WebSocket URL `{0}`: expected ws:// or wss://")]
    InvalidUrl(String),
}

fn validate_ws_url(url: &str) -> Result<String, ConfigError> {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(url.to_string())
    } else {
        Err(ConfigError::InvalidUrl(url.to_string()))
    }
}

fn parse_coins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
