//! Wire Ledger
//!
//! Which subscription objects are on the wire, and which keys hold each.
//!
//! Distinct keys can resolve to the same object: `webData2{user=<active>}`
//! and `webData2{user=0xabc}` are identical on the wire while `0xabc` is the
//! active identity. The exchange only knows the object, so the object is
//! subscribed when its first key attaches and unsubscribed when its last
//! key detaches.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::domain::subscription::SubscriptionKey;

/// Result of detaching a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detached {
    /// The key was the last holder; the object must be unsubscribed.
    Last(Value),
    /// Other keys still hold the object.
    Shared,
    /// The key held nothing.
    Absent,
}

#[derive(Debug)]
struct WireEntry {
    subscription: Value,
    holders: BTreeSet<SubscriptionKey>,
}

/// Reference counts of subscription objects on the current connection.
#[derive(Debug, Default)]
pub struct WireLedger {
    by_key: HashMap<SubscriptionKey, String>,
    by_object: HashMap<String, WireEntry>,
}

impl WireLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` is served by `subscription`.
    ///
    /// Returns true when the object was not on the wire yet, i.e. a
    /// subscribe frame is needed. A key already attached is moved.
    pub fn attach(&mut self, key: SubscriptionKey, subscription: Value) -> (bool, Detached) {
        let moved = self.detach(&key);
        let object = canonical(&subscription);
        self.by_key.insert(key.clone(), object.clone());

        let entry = self.by_object.entry(object).or_insert_with(|| WireEntry {
            subscription,
            holders: BTreeSet::new(),
        });
        let first = entry.holders.is_empty();
        entry.holders.insert(key);
        (first, moved)
    }

    /// Forget `key`.
    pub fn detach(&mut self, key: &SubscriptionKey) -> Detached {
        let Some(object) = self.by_key.remove(key) else {
            return Detached::Absent;
        };
        let Some(entry) = self.by_object.get_mut(&object) else {
            return Detached::Absent;
        };

        entry.holders.remove(key);
        if !entry.holders.is_empty() {
            return Detached::Shared;
        }
        self.by_object
            .remove(&object)
            .map_or(Detached::Absent, |entry| Detached::Last(entry.subscription))
    }

    /// Object currently serving `key`.
    #[must_use]
    pub fn get(&self, key: &SubscriptionKey) -> Option<&Value> {
        let object = self.by_key.get(key)?;
        self.by_object.get(object).map(|entry| &entry.subscription)
    }

    /// Whether `key` is served on the wire.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Distinct objects on the wire.
    #[must_use]
    pub fn objects(&self) -> usize {
        self.by_object.len()
    }

    /// Drop everything; the connection is gone.
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_object.clear();
    }
}

// Objects come from `SubscriptionKey::resolve`, which inserts fields in a
// fixed order, so equal objects print identically.
fn canonical(subscription: &Value) -> String {
    subscription.to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::subscription::Params;

    fn scoped() -> SubscriptionKey {
        SubscriptionKey::new("webData2", Params::new().with_active_user())
    }

    fn literal(address: &str) -> SubscriptionKey {
        SubscriptionKey::new("webData2", Params::new().with("user", address))
    }

    fn web(address: &str) -> Value {
        json!({"type": "webData2", "user": address})
    }

    #[test]
    fn first_holder_subscribes_last_holder_unsubscribes() {
        let mut ledger = WireLedger::new();

        assert_eq!(ledger.attach(scoped(), web("0xabc")), (true, Detached::Absent));
        assert_eq!(ledger.attach(literal("0xabc"), web("0xabc")), (false, Detached::Absent));
        assert_eq!(ledger.objects(), 1);

        assert_eq!(ledger.detach(&literal("0xabc")), Detached::Shared);
        assert!(ledger.contains(&scoped()));
        assert_eq!(ledger.detach(&scoped()), Detached::Last(web("0xabc")));
        assert_eq!(ledger.objects(), 0);
    }

    #[test]
    fn detach_unknown_key_is_absent() {
        let mut ledger = WireLedger::new();
        assert_eq!(ledger.detach(&scoped()), Detached::Absent);
    }

    #[test]
    fn reattach_moves_key_between_objects() {
        let mut ledger = WireLedger::new();
        ledger.attach(scoped(), web("0xabc"));
        ledger.attach(literal("0xdef"), web("0xdef"));

        let (first, moved) = ledger.attach(scoped(), web("0xdef"));

        assert!(!first);
        assert_eq!(moved, Detached::Last(web("0xabc")));
        assert_eq!(ledger.get(&scoped()), Some(&web("0xdef")));
        assert_eq!(ledger.objects(), 1);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut ledger = WireLedger::new();
        ledger.attach(scoped(), web("0xabc"));
        ledger.clear();
        assert!(!ledger.contains(&scoped()));
        assert_eq!(ledger.objects(), 0);
    }
}
