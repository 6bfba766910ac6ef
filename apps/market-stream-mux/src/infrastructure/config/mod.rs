//! Configuration Module
//!
//! Configuration loading for the multiplexer service.

mod settings;

pub use settings::{ConfigError, DemoSettings, MuxConfig, Network, ServerSettings, StreamSettings};
