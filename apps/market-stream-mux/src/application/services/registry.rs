//! Subscription Registry
//!
//! Thread-safe owner of the [`SubscriptionTable`]. Every 0→1 and 1→0
//! reference-count transition enqueues exactly one [`ControlCommand`] for the
//! connection supervisor, and the command is enqueued before the table lock
//! is released so concurrent callers cannot reorder wire frames.
//!
//! Listener callbacks run outside the lock on a snapshot of the listener
//! list, so a callback may itself subscribe or unsubscribe. A panicking
//! callback is caught and logged; the remaining listeners still run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::application::ports::{CommandSender, ControlCommand};
use crate::domain::subscription::{
    AddOutcome, Listener, ListenerId, RemoveOutcome, SubscriptionKey, SubscriptionTable,
    TableStats, WireState,
};

// =============================================================================
// Types
// =============================================================================

/// Registry size snapshot.
pub type RegistryStats = TableStats;

/// Result of delivering one payload to the listeners of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub panicked: usize,
}

impl DispatchReport {
    /// Combine two reports.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            delivered: self.delivered + other.delivered,
            panicked: self.panicked + other.panicked,
        }
    }
}

/// Reference-counted subscription registry.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    table: Mutex<SubscriptionTable>,
    commands: CommandSender,
}

impl SubscriptionRegistry {
    /// Create a registry that emits control commands on `commands`.
    #[must_use]
    pub fn new(commands: CommandSender) -> Self {
        Self {
            table: Mutex::new(SubscriptionTable::new()),
            commands,
        }
    }

    /// Attach `listener` to `key`.
    ///
    /// The first listener on a key enqueues a subscribe command. Registering
    /// a listener that is already attached is a no-op, and the returned
    /// handle does not own the existing registration.
    pub fn subscribe(
        self: &Arc<Self>,
        key: SubscriptionKey,
        listener: Listener,
    ) -> SubscriptionHandle {
        let listener_id = listener.id();
        let owns = {
            let mut table = self.table.lock();
            match table.add(&key, listener) {
                AddOutcome::FirstReference => {
                    tracing::debug!(key = %key, listener = %listener_id, "Subscription activated");
                    self.enqueue(ControlCommand::Subscribe(key.clone()));
                    true
                }
                AddOutcome::Added { ref_count } => {
                    tracing::trace!(key = %key, listener = %listener_id, ref_count, "Listener joined subscription");
                    true
                }
                AddOutcome::AlreadyRegistered => {
                    tracing::trace!(key = %key, listener = %listener_id, "Listener already registered");
                    false
                }
            }
        };

        SubscriptionHandle {
            registry: Arc::downgrade(self),
            key,
            listener: listener_id,
            owns,
        }
    }

    /// Detach a listener from a key.
    ///
    /// The last listener leaving enqueues an unsubscribe command. Unknown
    /// keys and listeners are ignored. Returns whether anything was removed.
    pub fn unsubscribe(&self, key: &SubscriptionKey, listener: ListenerId) -> bool {
        let mut table = self.table.lock();
        match table.remove(key, listener) {
            RemoveOutcome::LastReference => {
                tracing::debug!(key = %key, listener = %listener, "Subscription released");
                self.enqueue(ControlCommand::Unsubscribe(key.clone()));
                true
            }
            RemoveOutcome::Removed { ref_count } => {
                tracing::trace!(key = %key, listener = %listener, ref_count, "Listener left subscription");
                true
            }
            RemoveOutcome::NotFound => {
                tracing::trace!(key = %key, listener = %listener, "Unsubscribe for unknown listener ignored");
                false
            }
        }
    }

    /// Enqueue a rebind for every identity-scoped key. Returns how many.
    pub fn request_rebind(&self) -> usize {
        let table = self.table.lock();
        let keys = table.identity_scoped_keys();
        let count = keys.len();
        for key in keys {
            self.enqueue(ControlCommand::Rebind(key));
        }
        count
    }

    /// Deliver a payload to every listener of `key`.
    pub fn dispatch(&self, key: &SubscriptionKey, payload: &Value) -> DispatchReport {
        let listeners = self.table.lock().listeners(key);
        let mut report = DispatchReport::default();

        for listener in &listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.invoke(payload))) {
                Ok(()) => report.delivered += 1,
                Err(cause) => {
                    report.panicked += 1;
                    tracing::error!(
                        key = %key,
                        listener = %listener.id(),
                        panic = %panic_message(cause.as_ref()),
                        "Listener panicked during dispatch"
                    );
                }
            }
        }

        report
    }

    /// Snapshot of every active key.
    #[must_use]
    pub fn all_active_keys(&self) -> Vec<SubscriptionKey> {
        self.table.lock().keys()
    }

    /// Whether `key` currently has at least one listener.
    #[must_use]
    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.table.lock().contains(key)
    }

    /// Active keys on one channel.
    #[must_use]
    pub fn keys_for_channel(&self, channel: &str) -> Vec<SubscriptionKey> {
        self.table.lock().keys_for_channel(channel)
    }

    /// Number of listeners attached to `key`.
    #[must_use]
    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.table.lock().ref_count(key)
    }

    /// Wire state of `key`, if active.
    #[must_use]
    pub fn wire_state(&self, key: &SubscriptionKey) -> Option<WireState> {
        self.table.lock().wire_state(key)
    }

    /// Record that a subscribe frame for `key` was written.
    pub fn mark_sent(&self, key: &SubscriptionKey) {
        self.table.lock().set_wire_state(key, WireState::Sent);
    }

    /// Record that the exchange confirmed `key`.
    pub fn mark_acked(&self, key: &SubscriptionKey) -> bool {
        self.table.lock().set_wire_state(key, WireState::Acked)
    }

    /// Record that `key` is no longer on the wire.
    pub fn mark_unsent(&self, key: &SubscriptionKey) {
        self.table.lock().set_wire_state(key, WireState::Unsent);
    }

    /// Mark every key unsent after the connection dropped.
    pub fn reset_wire_states(&self) {
        self.table.lock().reset_wire_states();
    }

    /// Size snapshot.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.table.lock().stats()
    }

    fn enqueue(&self, command: ControlCommand) {
        if let Err(err) = self.commands.send(command) {
            tracing::trace!(command = err.0.kind(), key = %err.0.key(), "Connection supervisor gone; command dropped");
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    cause
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| cause.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Ownership of one listener registration.
///
/// Dropping or disposing the handle detaches the listener. A handle returned
/// for a duplicate registration owns nothing and is inert.
#[derive(Debug)]
#[must_use = "dropping the handle releases the subscription"]
pub struct SubscriptionHandle {
    registry: Weak<SubscriptionRegistry>,
    key: SubscriptionKey,
    listener: ListenerId,
    owns: bool,
}

impl SubscriptionHandle {
    /// Key of the registration.
    pub const fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Listener of the registration.
    pub const fn listener_id(&self) -> ListenerId {
        self.listener
    }

    /// Whether dropping this handle releases anything.
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        self.owns
    }

    /// Release the registration now.
    pub fn dispose(mut self) {
        self.release();
    }

    /// Keep the registration alive for the life of the registry.
    pub fn detach(mut self) {
        self.owns = false;
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.owns) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key, self.listener);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Tests
// =============================================================================
