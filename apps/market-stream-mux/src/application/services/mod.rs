//! Application Services
//!
//! - [`SubscriptionRegistry`]: reference-counted subscriptions, listener
//!   dispatch and control-command emission
//! - [`MessageRouter`]: maps inbound frames to the listeners of the keys
//!   they belong to
//! - [`IdentityContext`]: the active identity and the rebind it triggers

mod identity;
mod registry;
mod router;

pub use identity::IdentityContext;
pub use registry::{DispatchReport, RegistryStats, SubscriptionHandle, SubscriptionRegistry};
pub use router::{MessageRouter, RouteOutcome};
