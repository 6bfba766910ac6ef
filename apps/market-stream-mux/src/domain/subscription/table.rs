//! Reference-Counted Subscription Table
//!
//! Pure bookkeeping of which listeners are attached to which key. The table
//! reports 0→1 and 1→0 transitions so the caller can decide when a wire
//! frame is required; it never performs I/O itself.

use std::collections::HashMap;

use super::{Listener, ListenerId, SubscriptionKey, WireState};

// =============================================================================
// Types
// =============================================================================

/// Result of attaching a listener to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The key became active (0→1); a subscribe frame is required.
    FirstReference,
    /// The key was already active; the listener joined it.
    Added {
        /// Listener count after the add.
        ref_count: usize,
    },
    /// This listener is already registered under the key.
    AlreadyRegistered,
}

/// Result of detaching a listener from a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The key became inactive (1→0); an unsubscribe frame is required.
    LastReference,
    /// Other listeners remain.
    Removed {
        /// Listener count after the removal.
        ref_count: usize,
    },
    /// Unknown key or listener.
    NotFound,
}

/// Snapshot of table size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    /// Active keys.
    pub keys: usize,
    /// Listener registrations across all keys.
    pub listeners: usize,
    /// Active keys bound to the active identity.
    pub identity_scoped: usize,
}

#[derive(Debug)]
struct Entry {
    listeners: Vec<Listener>,
    wire_state: WireState,
}

/// Mapping from key to its listeners and wire state.
///
/// A key is present exactly while it has at least one listener, so its
/// reference count is always the number of distinct listeners.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<SubscriptionKey, Entry>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener to a key.
    pub fn add(&mut self, key: &SubscriptionKey, listener: Listener) -> AddOutcome {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.listeners.iter().any(|l| l.id() == listener.id()) {
                return AddOutcome::AlreadyRegistered;
            }
            entry.listeners.push(listener);
            return AddOutcome::Added {
                ref_count: entry.listeners.len(),
            };
        }

        self.entries.insert(
            key.clone(),
            Entry {
                listeners: vec![listener],
                wire_state: WireState::Unsent,
            },
        );
        AddOutcome::FirstReference
    }

    /// Detach a listener from a key, dropping the key at zero references.
    pub fn remove(&mut self, key: &SubscriptionKey, listener: ListenerId) -> RemoveOutcome {
        let Some(entry) = self.entries.get_mut(key) else {
            return RemoveOutcome::NotFound;
        };

        let before = entry.listeners.len();
        entry.listeners.retain(|l| l.id() != listener);
        let after = entry.listeners.len();

        if after == before {
            RemoveOutcome::NotFound
        } else if after == 0 {
            self.entries.remove(key);
            RemoveOutcome::LastReference
        } else {
            RemoveOutcome::Removed { ref_count: after }
        }
    }

    /// Snapshot of the listeners for a key, in registration order.
    #[must_use]
    pub fn listeners(&self, key: &SubscriptionKey) -> Vec<Listener> {
        self.entries
            .get(key)
            .map(|e| e.listeners.clone())
            .unwrap_or_default()
    }

    /// Number of listeners attached to a key.
    #[must_use]
    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.listeners.len())
    }

    /// Whether the key has at least one listener.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// All active keys in canonical order.
    #[must_use]
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Active keys on one channel.
    #[must_use]
    pub fn keys_for_channel(&self, channel: &str) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .entries
            .keys()
            .filter(|k| k.channel() == channel)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Active keys carrying the identity placeholder.
    #[must_use]
    pub fn identity_scoped_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .entries
            .keys()
            .filter(|k| k.is_identity_scoped())
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Wire state of a key, if active.
    #[must_use]
    pub fn wire_state(&self, key: &SubscriptionKey) -> Option<WireState> {
        self.entries.get(key).map(|e| e.wire_state)
    }

    /// Update the wire state of an active key. Returns false if inactive.
    pub fn set_wire_state(&mut self, key: &SubscriptionKey, state: WireState) -> bool {
        self.entries.get_mut(key).is_some_and(|e| {
            e.wire_state = state;
            true
        })
    }

    /// Mark every key as unsent, e.g. after the connection dropped.
    pub fn reset_wire_states(&mut self) {
        for entry in self.entries.values_mut() {
            entry.wire_state = WireState::Unsent;
        }
    }

    /// Size snapshot.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats {
            keys: self.entries.len(),
            listeners: self.entries.values().map(|e| e.listeners.len()).sum(),
            identity_scoped: self
                .entries
                .keys()
                .filter(|k| k.is_identity_scoped())
                .count(),
        }
    }

    /// Whether the table has no active keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
