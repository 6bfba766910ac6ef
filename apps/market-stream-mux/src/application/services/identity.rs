//! Identity Context
//!
//! Holds the active wallet address. Changing it does not touch listener
//! sets: it only asks the supervisor to re-parameterise identity-scoped keys
//! already on the wire. The supervisor resolves the identity at send time,
//! so rapid successive changes collapse into one rebind to the latest value.

use std::sync::Arc;

use parking_lot::RwLock;

use super::SubscriptionRegistry;
use crate::domain::identity::IdentityBinding;

/// Shared holder of the active identity.
#[derive(Debug)]
pub struct IdentityContext {
    binding: RwLock<IdentityBinding>,
    registry: Arc<SubscriptionRegistry>,
}

impl IdentityContext {
    /// Create an unbound context over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            binding: RwLock::new(IdentityBinding::unbound()),
            registry,
        }
    }

    /// Current binding.
    #[must_use]
    pub fn current(&self) -> IdentityBinding {
        self.binding.read().clone()
    }

    /// Replace the active identity.
    ///
    /// Returns false when the normalised address is unchanged, in which case
    /// nothing is sent.
    pub fn set_active_identity(&self, address: Option<&str>) -> bool {
        let next = IdentityBinding::from_option(address);
        let mut binding = self.binding.write();

        if *binding == next {
            tracing::trace!(identity = next.resolved(), "Active identity unchanged");
            return false;
        }

        let previous = std::mem::replace(&mut *binding, next);
        let rebound = self.registry.request_rebind();

        tracing::info!(
            previous = previous.resolved(),
            current = binding.resolved(),
            rebound,
            "Active identity changed"
        );
        true
    }

    /// Whether `candidate` is the active identity (or the sentinel while
    /// unbound).
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.binding.read().matches(candidate)
    }
}
