//! Domain Layer - Core subscription and stream types.
//!
//! This layer contains the canonical subscription identity, the connection
//! lifecycle, the identity binding and the wire-level message types. It
//! performs no I/O; everything here is pure Rust with serialization support.

/// Connection lifecycle states.
pub mod connection;

/// Active wallet identity binding.
pub mod identity;

/// Exchange wire messages and typed payloads.
pub mod streaming;

/// Subscription keys, listeners and the reference-counted table.
pub mod subscription;
