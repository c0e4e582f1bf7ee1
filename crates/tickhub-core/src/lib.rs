//! # tickhub-core
//!
//! Core crate for the price hub, providing:
//!
//! - **Types** (`types`) — symbols, price points, directives, status enums
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — domain-specific `HubError` via thiserror
//! - **WebSocket** (`ws`) — the streaming transport with bounded reconnect
//! - **Time utilities** (`time_util`) — wall-clock timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
