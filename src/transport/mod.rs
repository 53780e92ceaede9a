//! Socket transports
//!
//! A transport is a bidirectional, event-named publish/subscribe pipe. The
//! session only needs four things from it: open, emit, subscribe and close.
//! Request/response semantics are layered on top by the agent request channel.
//!
//! - [`websocket::WebSocketTransport`]: persistent stream (preferred)
//! - [`polling::PollingTransport`]: HTTP long-polling (fallback)
//! - [`loopback::LoopbackTransport`]: in-process pipe with a scriptable server end

pub mod listeners;
pub mod loopback;
pub mod polling;
pub mod protocol;
pub mod websocket;

mod dispatch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::core::TransportError;

pub use listeners::Listeners;
pub use loopback::{LoopbackServer, LoopbackTransport};
pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

/// Subscription handle returned by `on` / `on_lifecycle`
pub type ListenerId = u64;

/// Handler for a named inbound event
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handler for connection lifecycle signals
pub type LifecycleHandler = Arc<dyn Fn(&Lifecycle) + Send + Sync>;

/// Connection lifecycle signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Namespace connected; events may flow
    Opened,
    /// Connection closed (reason)
    Closed(String),
    /// Transport-level error (message)
    Error(String),
}

/// Transport flavours, in the order they are tried by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[serde(alias = "ws")]
    WebSocket,
    Polling,
}

impl TransportKind {
    /// Default preference order: persistent stream first, polling second
    pub fn preference() -> Vec<TransportKind> {
        vec![TransportKind::WebSocket, TransportKind::Polling]
    }

    /// Name used in the Engine.IO `transport` query parameter
    pub fn query_name(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.query_name())
    }
}

/// Event-based socket transport
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Name of the transport, for logs
    fn name(&self) -> &'static str;

    /// Open the connection and join the default namespace
    ///
    /// Resolves once the server has acknowledged the namespace connect.
    async fn open(&self) -> Result<(), TransportError>;

    /// Queue an event for delivery (never blocks)
    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Subscribe to a named inbound event
    fn on(&self, event: &str, handler: EventHandler) -> ListenerId;

    /// Subscribe to lifecycle signals
    fn on_lifecycle(&self, handler: LifecycleHandler) -> ListenerId;

    /// Remove one subscription
    fn off(&self, id: ListenerId);

    /// Remove every subscription
    fn off_all(&self);

    /// Whether the namespace is currently connected
    fn is_open(&self) -> bool;

    /// Close the connection; idempotent
    fn close(&self);
}

/// Options shared by the network transports
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Time allowed for the handshake and namespace connect
    pub connect_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Build the Engine.IO URL for `endpoint` + `path`
///
/// The scheme follows the transport: `ws`/`wss` for WebSocket, `http`/`https`
/// for polling, whatever scheme the endpoint was given with.
pub fn engine_url(
    endpoint: &str,
    path: &str,
    kind: TransportKind,
    sid: Option<&str>,
) -> Result<Url, TransportError> {
    let base = Url::parse(endpoint)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    let mut url = base
        .join(path)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}{}: {}", endpoint, path, e)))?;

    let secure = matches!(url.scheme(), "https" | "wss");
    let scheme = match (kind, secure) {
        (TransportKind::WebSocket, false) => "ws",
        (TransportKind::WebSocket, true) => "wss",
        (TransportKind::Polling, false) => "http",
        (TransportKind::Polling, true) => "https",
    };
    url.set_scheme(scheme).map_err(|_| {
        TransportError::InvalidEndpoint(format!("unsupported scheme in {}", endpoint))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("EIO", protocol::ENGINE_IO_VERSION);
        query.append_pair("transport", kind.query_name());
        if let Some(sid) = sid {
            query.append_pair("sid", sid);
        }
    }

    Ok(url)
}

/// Create a network transport of the given kind
pub fn build_transport(
    kind: TransportKind,
    endpoint: &str,
    path: &str,
    options: TransportOptions,
) -> Arc<dyn SocketTransport> {
    match kind {
        TransportKind::WebSocket => Arc::new(WebSocketTransport::new(endpoint, path, options)),
        TransportKind::Polling => Arc::new(PollingTransport::new(endpoint, path, options)),
    }
}
