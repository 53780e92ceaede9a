//! Domain error types
//!
//! Transport failures and request-channel failures are kept apart: the
//! session never surfaces transport errors as chat messages, only as the
//! connected flag, while channel errors always become `error` entries.

use thiserror::Error;

/// Errors raised by a socket transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Socket not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("No transport could be opened")]
    NoTransport,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors decoding Engine.IO / Socket.IO frames
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown Engine.IO packet type: {0}")]
    UnknownPacketType(char),

    #[error("Unknown Socket.IO packet type: {0}")]
    UnknownSocketPacketType(char),

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

/// Errors from the agent request channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// `execute` called while the socket is not connected
    #[error("Not connected to agent server")]
    NotConnected,

    /// `execute` called while another request is still unresolved
    #[error("Agent is already executing a request")]
    AlreadyExecuting,

    /// Backend emitted `agent:error`
    #[error("{0}")]
    Backend(String),

    /// No terminal event within the configured timeout
    #[error("Agent request timed out after {0}s")]
    Timeout(u64),

    /// Transport torn down while the request was in flight
    #[error("Connection closed before the agent responded")]
    Disconnected,

    /// The outbound event could not be emitted
    #[error("Failed to send request: {0}")]
    Transport(#[from] TransportError),
}

impl ChannelError {
    /// Precondition failures are rejected before anything is emitted
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NotConnected | Self::AlreadyExecuting)
    }
}
