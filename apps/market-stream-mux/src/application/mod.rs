//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the subscription registry, the inbound message router
//! and the identity context, plus the port interfaces through which they
//! reach the upstream connection.

/// Port interfaces for the upstream transport and the control queue.
pub mod ports;

/// Application services: registry, router, identity.
pub mod services;
