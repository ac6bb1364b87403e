//! `flowbeat-core` — configuration and shared constants.
//!
//! Everything here is deliberately free of I/O beyond reading the config
//! file: the gateway builds one [`config::FlowbeatConfig`] at startup and
//! passes it (or pieces of it) into each subsystem by value. There is no
//! process-wide configuration state.

pub mod config;
pub mod error;

pub use config::FlowbeatConfig;
pub use error::{CoreError, Result};
