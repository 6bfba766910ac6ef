//! Exchange Wire Messages
//!
//! Outbound control frames, the inbound frame envelope and typed views of
//! the most common market data payloads.
//!
//! Every inbound text frame is a JSON object `{"channel": ..., "data": ...}`.
//! Outbound control frames are `{"method": "subscribe"|"unsubscribe",
//! "subscription": {...}}` plus the bare `{"method": "ping"}` keepalive.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Channel Names
// =============================================================================

/// Channels that carry connection-level control rather than data.
pub mod channels {
    /// Keepalive reply.
    pub const PONG: &str = "pong";
    /// Subscribe/unsubscribe acknowledgement.
    pub const SUBSCRIPTION_RESPONSE: &str = "subscriptionResponse";
    /// Server-side error report.
    pub const ERROR: &str = "error";
    /// Inbound channel used for `userEvents` payloads.
    pub const USER: &str = "user";
    /// Subscription type served on the [`USER`] channel.
    pub const USER_EVENTS: &str = "userEvents";
}

/// Keepalive frame sent on the heartbeat interval.
pub const PING_FRAME: &str = r#"{"method":"ping"}"#;

// =============================================================================
// Outbound
// =============================================================================

/// Control frame verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMethod {
    /// Start a wire subscription.
    Subscribe,
    /// Stop a wire subscription.
    Unsubscribe,
}

impl ControlMethod {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Outbound subscribe/unsubscribe frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlFrame {
    /// Verb.
    pub method: ControlMethod,
    /// Resolved subscription object, including its `type`.
    pub subscription: Value,
}

impl ControlFrame {
    /// Subscribe frame.
    #[must_use]
    pub const fn subscribe(subscription: Value) -> Self {
        Self {
            method: ControlMethod::Subscribe,
            subscription,
        }
    }

    /// Unsubscribe frame.
    #[must_use]
    pub const fn unsubscribe(subscription: Value) -> Self {
        Self {
            method: ControlMethod::Unsubscribe,
            subscription,
        }
    }

    /// Serialize to the JSON text sent on the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Envelope of every inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    /// Channel name.
    pub channel: String,
    /// Payload; absent for `pong`.
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    /// Parse raw socket text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with a `channel`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Payload of a `subscriptionResponse` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionResponse {
    /// Verb being acknowledged.
    pub method: ControlMethod,
    /// Echoed subscription object.
    pub subscription: Value,
}

// =============================================================================
// Typed Payloads
// =============================================================================

/// One price level of an order book side.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookLevel {
    /// Price.
    pub px: Decimal,
    /// Aggregate size.
    pub sz: Decimal,
    /// Number of orders at the level.
    pub n: u32,
}

/// `l2Book` payload: bids first, asks second.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct L2BookData {
    /// Coin symbol.
    pub coin: String,
    /// Exchange timestamp in milliseconds.
    pub time: u64,
    /// `[bids, asks]`.
    pub levels: [Vec<BookLevel>; 2],
}

impl L2BookData {
    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.levels[0].first()
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.levels[1].first()
    }

    /// Midpoint of the top of book.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.px;
        let ask = self.best_ask()?.px;
        Some((bid + ask) / Decimal::TWO)
    }
}

/// `allMids` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllMidsData {
    /// Mid price per coin.
    pub mids: HashMap<String, Decimal>,
}

/// `trades` payload element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeData {
    /// Coin symbol.
    pub coin: String,
    /// `B` for buy aggressor, `A` for sell.
    pub side: String,
    /// Price.
    pub px: Decimal,
    /// Size.
    pub sz: Decimal,
    /// Exchange timestamp in milliseconds.
    pub time: u64,
    /// Trade id.
    pub tid: u64,
}

/// Perpetual asset context inside `activeAssetCtx`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    /// Current funding rate.
    pub funding: Decimal,
    /// Open interest.
    pub open_interest: Decimal,
    /// Oracle price.
    pub oracle_px: Decimal,
    /// Mark price.
    pub mark_px: Decimal,
    /// Mid price, absent when the book is one-sided.
    #[serde(default)]
    pub mid_px: Option<Decimal>,
    /// Previous day close.
    pub prev_day_px: Decimal,
    /// 24h notional volume.
    pub day_ntl_vlm: Decimal,
}

/// `activeAssetCtx` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActiveAssetCtxData {
    /// Coin symbol.
    pub coin: String,
    /// Asset context.
    pub ctx: AssetCtx,
}

// =============================================================================
// Tests
// =============================================================================
