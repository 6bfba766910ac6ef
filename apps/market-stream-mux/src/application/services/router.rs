//! Message Router
//!
//! Maps each inbound frame to the listeners of the subscription keys it
//! belongs to. The router keeps no state of its own: it reads the registry
//! and the identity context on every frame.
//!
//! # Matching
//!
//! A frame on channel `C` is a candidate for every active key whose channel
//! is `C` (the `user` channel serves `userEvents` keys). A candidate matches
//! unless the payload carries a routing field whose value contradicts the
//! key's parameter of the same name. Array payloads are matched on their
//! first element. `candle` payloads carry `coin` as `s` and `interval` as
//! `i`. Addresses compare case-insensitively.
//!
//! A frame that matches several keys (e.g. `l2Book{coin=BTC}` and
//! `l2Book{coin=BTC,nSigFigs=5}`, since books do not echo `nSigFigs`) is
//! delivered to all of them.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{DispatchReport, IdentityContext, SubscriptionRegistry};
use crate::domain::identity::IdentityBinding;
use crate::domain::streaming::{ControlMethod, InboundFrame, SubscriptionResponse, channels};
use crate::domain::subscription::{CHANNEL_FIELD, IDENTITY_PARAM, ParamValue, SubscriptionKey};

// =============================================================================
// Types
// =============================================================================

/// What the router did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Payload delivered to the listeners of one or more keys.
    Delivered {
        /// Inbound channel.
        channel: String,
        /// Number of keys that matched.
        keys: usize,
        /// Combined listener results.
        report: DispatchReport,
    },
    /// Keepalive reply.
    Pong,
    /// Subscribe/unsubscribe acknowledgement.
    Acknowledged {
        /// Verb acknowledged.
        method: ControlMethod,
        /// Matching active key, if any.
        key: Option<SubscriptionKey>,
    },
    /// The exchange reported an error.
    ServerError(String),
    /// No active key matched.
    Unmatched {
        /// Inbound channel.
        channel: String,
    },
    /// The frame could not be parsed.
    Malformed(String),
}

/// Stateless inbound frame router.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
    identity: Arc<IdentityContext>,
}

impl MessageRouter {
    /// Create a router over the shared registry and identity.
    #[must_use]
    pub const fn new(registry: Arc<SubscriptionRegistry>, identity: Arc<IdentityContext>) -> Self {
        Self { registry, identity }
    }

    /// Route one raw text frame.
    pub fn route(&self, text: &str) -> RouteOutcome {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed frame");
                return RouteOutcome::Malformed(err.to_string());
            }
        };

        match frame.channel.as_str() {
            channels::PONG => RouteOutcome::Pong,
            channels::SUBSCRIPTION_RESPONSE => self.acknowledge(frame.data),
            channels::ERROR => {
                let message = frame
                    .data
                    .as_str()
                    .map_or_else(|| frame.data.to_string(), str::to_string);
                tracing::warn!(error = %message, "Exchange reported an error");
                RouteOutcome::ServerError(message)
            }
            channel => self.deliver(channel, &frame.data),
        }
    }

    fn deliver(&self, channel: &str, data: &Value) -> RouteOutcome {
        let candidates = self.registry.keys_for_channel(subscription_type_for(channel));
        let identity = self.identity.current();
        let sample = routing_sample(data);

        let mut keys = 0;
        let mut report = DispatchReport::default();
        for key in candidates
            .iter()
            .filter(|key| payload_matches(key, &identity, sample))
        {
            keys += 1;
            report = report.merge(self.registry.dispatch(key, data));
        }

        if keys == 0 {
            tracing::debug!(channel, "No active subscription for frame");
            return RouteOutcome::Unmatched {
                channel: channel.to_string(),
            };
        }

        RouteOutcome::Delivered {
            channel: channel.to_string(),
            keys,
            report,
        }
    }

    fn acknowledge(&self, data: Value) -> RouteOutcome {
        let response: SubscriptionResponse = match serde_json::from_value(data) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed subscription response");
                return RouteOutcome::Malformed(err.to_string());
            }
        };

        let key = self.find_key(&response.subscription);
        if response.method == ControlMethod::Subscribe
            && let Some(key) = &key
        {
            self.registry.mark_acked(key);
        }

        tracing::debug!(
            method = response.method.as_str(),
            subscription = %response.subscription,
            matched = key.is_some(),
            "Subscription acknowledged"
        );

        RouteOutcome::Acknowledged {
            method: response.method,
            key,
        }
    }

    fn find_key(&self, echoed: &Value) -> Option<SubscriptionKey> {
        let channel = echoed.get(CHANNEL_FIELD)?.as_str()?;
        let identity = self.identity.current();
        self.registry
            .keys_for_channel(channel)
            .into_iter()
            .find(|key| wire_equivalent(&key.resolve(&identity), echoed))
    }
}

// =============================================================================
// Matching
// =============================================================================

fn subscription_type_for(channel: &str) -> &str {
    match channel {
        channels::USER => channels::USER_EVENTS,
        other => other,
    }
}

fn routing_sample(data: &Value) -> Option<&Map<String, Value>> {
    match data {
        Value::Array(items) => items.first().and_then(Value::as_object),
        other => other.as_object(),
    }
}

fn payload_field<'a>(channel: &str, param: &'a str) -> &'a str {
    match (channel, param) {
        ("candle", "coin") => "s",
        ("candle", "interval") => "i",
        _ => param,
    }
}

fn payload_matches(
    key: &SubscriptionKey,
    identity: &IdentityBinding,
    sample: Option<&Map<String, Value>>,
) -> bool {
    let Some(sample) = sample else {
        return true;
    };

    key.params().iter().all(|(name, expected)| {
        sample
            .get(payload_field(key.channel(), name))
            .is_none_or(|actual| value_matches(name, expected, identity, actual))
    })
}

fn value_matches(
    name: &str,
    expected: &ParamValue,
    identity: &IdentityBinding,
    actual: &Value,
) -> bool {
    match (expected, actual) {
        (ParamValue::ActiveIdentity, Value::String(s)) => identity.matches(s),
        (ParamValue::Str(e), Value::String(s)) if name == IDENTITY_PARAM => {
            e.eq_ignore_ascii_case(s)
        }
        (ParamValue::Str(e), Value::String(s)) => e == s,
        (ParamValue::Int(e), Value::Number(n)) => n.as_i64() == Some(*e),
        (ParamValue::Bool(e), Value::Bool(b)) => e == b,
        _ => false,
    }
}

/// Whether an echoed subscription object is the one we sent. Extra fields
/// in the echo are ignored.
fn wire_equivalent(sent: &Value, echoed: &Value) -> bool {
    let (Some(sent), Some(echoed)) = (sent.as_object(), echoed.as_object()) else {
        return false;
    };

    sent.iter().all(|(name, value)| {
        echoed.get(name).is_some_and(|other| {
            match (name.as_str(), value.as_str(), other.as_str()) {
                (IDENTITY_PARAM, Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => value == other,
            }
        })
    })
}

// =============================================================================
// Tests
// =============================================================================
