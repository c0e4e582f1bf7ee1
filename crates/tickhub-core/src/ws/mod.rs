//! WebSocket transport with bounded reconnect and subscription replay.

pub mod client;

pub use client::{OnMessageCallback, OnReconnectCallback, OnStatusCallback, WsConnConfig, WsTransport};

use crate::types::Directive;

/// Destination for outbound subscription directives.
///
/// Implemented by [`WsTransport`]; tests substitute a recorder.
pub trait DirectiveSink: Send + Sync {
    /// Hand over a directive. Must not block and must not fail loudly.
    fn send(&self, directive: &Directive);
}
