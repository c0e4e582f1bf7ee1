//! Typed error definitions for the price hub.
//!
//! Provides [`HubError`] for setup and transport failures. Consumer-facing
//! subscription calls never return it; transport failures reach consumers only
//! through status events, which is why the type is `Clone`.

use thiserror::Error;

/// Domain-specific errors for the price hub.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HubError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The transport gave up after the configured number of reconnect attempts.
    #[error("reconnect attempts exhausted after {attempts} attempt(s)")]
    ReconnectExhausted { attempts: u32 },
}
