//! Enumerations shared by the transport, the hub, and configuration.

use serde::{Deserialize, Serialize};

use crate::error::HubError;

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A status transition as seen by `on_status_change` handlers.
///
/// `error` is set when the transition was caused by a failure. A
/// `Disconnected` event carrying [`HubError::ReconnectExhausted`] is terminal:
/// the transport stays down until `connect()` is called again.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub status: ConnectionStatus,
    pub error: Option<HubError>,
}

impl StatusEvent {
    pub fn new(status: ConnectionStatus) -> Self {
        Self { status, error: None }
    }

    pub fn failed(status: ConnectionStatus, error: HubError) -> Self {
        Self { status, error: Some(error) }
    }

    /// Whether the transport gave up reconnecting.
    pub fn is_terminal(&self) -> bool {
        matches!(self.error, Some(HubError::ReconnectExhausted { .. }))
    }
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Delay growth between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at `max_reconnect_delay_ms`.
    Exponential,
}

// ---------------------------------------------------------------------------
// Partial price messages
// ---------------------------------------------------------------------------

/// How to fill `percent_change_24h` when an inbound update carries only a
/// price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingChangePolicy {
    /// Keep the previously cached change (0.0 if nothing is cached yet).
    #[default]
    Preserve,
    /// Reset the change to 0.0.
    Zero,
}
