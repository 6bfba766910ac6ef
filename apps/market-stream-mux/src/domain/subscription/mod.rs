//! Subscription Identity Types
//!
//! Canonical identity for a (channel, parameter set) pair and the listener
//! callbacks attached to it.
//!
//! # Design
//!
//! Parameters are kept in a `BTreeMap`, so two requests built with the same
//! fields in a different order produce equal, identically hashed keys. The
//! active wallet address is never baked into a key: identity-bound channels
//! carry the [`ParamValue::ActiveIdentity`] placeholder under
//! [`IDENTITY_PARAM`] and are resolved against the current
//! [`IdentityBinding`] only when a wire frame is built.

mod table;

pub use table::{AddOutcome, RemoveOutcome, SubscriptionTable, TableStats};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::domain::identity::IdentityBinding;

// =============================================================================
// Constants
// =============================================================================

/// Reserved parameter name that marks a subscription as identity-bound.
pub const IDENTITY_PARAM: &str = "user";

/// Field of the wire `subscription` object that carries the channel name.
pub const CHANNEL_FIELD: &str = "type";

/// Always-on channels whose only parameter is the active identity.
pub const IDENTITY_SCOPED_EVENTS: &[&str] = &[
    "webData2",
    "userEvents",
    "userFills",
    "orderUpdates",
    "notification",
    "userFundings",
    "userNonFundingLedgerUpdates",
];

// =============================================================================
// Parameter Values
// =============================================================================

/// A single primitive subscription parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamValue {
    /// String value (coin, interval, literal address).
    Str(String),
    /// Integer value (significant figures, mantissa).
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Placeholder replaced by the active identity when the frame is built.
    ActiveIdentity,
}

impl ParamValue {
    /// Render the value for the wire, resolving the identity placeholder.
    #[must_use]
    pub fn resolve(&self, identity: &IdentityBinding) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Bool(b) => Value::Bool(*b),
            Self::ActiveIdentity => Value::String(identity.resolved().to_string()),
        }
    }

    /// Convert a JSON primitive into a parameter value.
    fn from_json(name: &str, value: &Value) -> Result<Self, ParamsError> {
        match value {
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| ParamsError::UnsupportedValue(name.to_string())),
            _ => Err(ParamsError::UnsupportedValue(name.to_string())),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::ActiveIdentity => f.write_str("<active>"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// =============================================================================
// Parameter Set
// =============================================================================

/// Errors raised while building parameters from loosely typed input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    /// Input was not a JSON object.
    #[error("subscription parameters must be a JSON object")]
    NotAnObject,

    /// The `type` field is reserved for the channel name.
    #[error("parameter name `{0}` is reserved")]
    ReservedName(String),

    /// Nested objects, arrays, nulls and floats cannot be part of a key.
    #[error("parameter `{0}` must be a string, integer or boolean")]
    UnsupportedValue(String),

    /// A subscription object had no channel name.
    #[error("subscription object has no `type` field")]
    MissingChannel,
}

/// Canonical, ordered parameter set of a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    /// Create an empty parameter set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Bind the reserved `user` parameter to the active identity.
    #[must_use]
    pub fn with_active_user(self) -> Self {
        self.with(IDENTITY_PARAM, ParamValue::ActiveIdentity)
    }

    /// Insert a parameter, returning the previous value if any.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Option<ParamValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Iterate parameters in canonical (name) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any parameter is the identity placeholder.
    #[must_use]
    pub fn is_identity_scoped(&self) -> bool {
        self.0
            .values()
            .any(|v| matches!(v, ParamValue::ActiveIdentity))
    }

    /// Build parameters from a JSON object of primitives.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError`] for non-objects, the reserved `type` field and
    /// values that are not strings, integers or booleans.
    pub fn from_json(value: &Value) -> Result<Self, ParamsError> {
        let object = value.as_object().ok_or(ParamsError::NotAnObject)?;
        let mut params = Self::new();

        for (name, raw) in object {
            if name == CHANNEL_FIELD {
                return Err(ParamsError::ReservedName(name.clone()));
            }
            params
                .0
                .insert(name.clone(), ParamValue::from_json(name, raw)?);
        }

        Ok(params)
    }

    /// Parameters for an always-on event registered through `add_listener`.
    ///
    /// Identity-scoped events get the `user` placeholder, everything else
    /// (e.g. `allMids`) is parameterless.
    #[must_use]
    pub fn for_event(event: &str) -> Self {
        if IDENTITY_SCOPED_EVENTS.contains(&event) {
            Self::new().with_active_user()
        } else {
            Self::new()
        }
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// Subscription Key
// =============================================================================

/// Canonical identity of a (channel, parameter set) pair.
///
/// Used for deduplication and wire-frame suppression: at most one wire
/// subscription exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    channel: String,
    params: Params,
}

impl SubscriptionKey {
    /// Create a key.
    #[must_use]
    pub fn new(channel: impl Into<String>, params: Params) -> Self {
        Self {
            channel: channel.into(),
            params,
        }
    }

    /// Channel name (the wire `type`).
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Parameter set.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Whether the key is re-parameterised when the active identity changes.
    #[must_use]
    pub fn is_identity_scoped(&self) -> bool {
        self.params.is_identity_scoped()
    }

    /// Build the wire `subscription` object for the given identity.
    #[must_use]
    pub fn resolve(&self, identity: &IdentityBinding) -> Value {
        let mut object = Map::with_capacity(self.params.len() + 1);
        object.insert(
            CHANNEL_FIELD.to_string(),
            Value::String(self.channel.clone()),
        );
        for (name, value) in self.params.iter() {
            object.insert(name.to_string(), value.resolve(identity));
        }
        Value::Object(object)
    }

    /// Parse a full subscription object such as `{"type":"l2Book","coin":"BTC"}`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError`] if the object has no channel or carries
    /// unsupported values.
    pub fn from_subscription(value: &Value) -> Result<Self, ParamsError> {
        let object = value.as_object().ok_or(ParamsError::NotAnObject)?;
        let channel = object
            .get(CHANNEL_FIELD)
            .and_then(Value::as_str)
            .ok_or(ParamsError::MissingChannel)?;

        let rest: Map<String, Value> = object
            .iter()
            .filter(|(name, _)| name.as_str() != CHANNEL_FIELD)
            .map(|(name, v)| (name.clone(), v.clone()))
            .collect();

        Ok(Self::new(channel, Params::from_json(&Value::Object(rest))?))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel)?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

// =============================================================================
// Listeners
// =============================================================================

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a listener callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback signature for data payloads.
pub type ListenerFn = dyn Fn(&Value) + Send + Sync;

/// A data callback with a stable identity.
///
/// Clones share the identity, so registering a clone of an already
/// registered listener is a no-op.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Arc<ListenerFn>,
}

impl Listener {
    /// Wrap a callback, assigning it a fresh identity.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(callback),
        }
    }

    /// Listener identity.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Invoke the callback.
    pub fn invoke(&self, payload: &Value) {
        (self.callback)(payload);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

// =============================================================================
// Wire State
// =============================================================================

/// How far a subscription has made it onto the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireState {
    /// No subscribe frame on the current connection.
    #[default]
    Unsent,
    /// Subscribe frame written, no confirmation yet.
    Sent,
    /// Exchange confirmed the subscription.
    Acked,
}

// =============================================================================
// Tests
// =============================================================================
