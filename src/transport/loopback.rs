//! In-process loopback transport
//!
//! A transport whose "server" is a handle held by the caller. Used by the
//! test suites and by `agentsock chat --sim`, where [`SimulatedAgent`] plays
//! the backend.
//!
//! Server-to-client events are dispatched synchronously on the caller's task,
//! so a test can emit and immediately assert on session state.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::listeners::Listeners;
use super::protocol::{ExecuteRequest, EVENT_ERROR, EVENT_EXECUTE, EVENT_PROGRESS, EVENT_RESULT};
use super::{EventHandler, Lifecycle, LifecycleHandler, ListenerId, SocketTransport};
use crate::core::TransportError;

/// An event the client emitted towards the server
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEmit {
    pub event: String,
    pub payload: Value,
}

struct Shared {
    listeners: Listeners,
    open: AtomicBool,
    reachable: AtomicBool,
}

/// Client end of the loopback pipe
pub struct LoopbackTransport {
    shared: Arc<Shared>,
    to_server: mpsc::UnboundedSender<ClientEmit>,
}

/// Server end of the loopback pipe
pub struct LoopbackServer {
    shared: Arc<Shared>,
    from_client: Mutex<mpsc::UnboundedReceiver<ClientEmit>>,
}

impl LoopbackTransport {
    /// Create a connected client/server pair (the client still has to `open`)
    pub fn pair() -> (Arc<LoopbackTransport>, LoopbackServer) {
        let shared = Arc::new(Shared {
            listeners: Listeners::new(),
            open: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(LoopbackTransport {
            shared: shared.clone(),
            to_server: tx,
        });
        let server = LoopbackServer {
            shared,
            from_client: Mutex::new(rx),
        };
        (client, server)
    }
}

#[async_trait]
impl SocketTransport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn open(&self) -> Result<(), TransportError> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "loopback server unreachable".to_string(),
            ));
        }
        if !self.shared.open.swap(true, Ordering::SeqCst) {
            self.shared.listeners.dispatch_lifecycle(&Lifecycle::Opened);
        }
        Ok(())
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.shared.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.to_server
            .send(ClientEmit {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| TransportError::SendFailed("loopback server dropped".to_string()))
    }

    fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.shared.listeners.on(event, handler)
    }

    fn on_lifecycle(&self, handler: LifecycleHandler) -> ListenerId {
        self.shared.listeners.on_lifecycle(handler)
    }

    fn off(&self, id: ListenerId) {
        self.shared.listeners.off(id);
    }

    fn off_all(&self) {
        self.shared.listeners.clear();
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            self.shared
                .listeners
                .dispatch_lifecycle(&Lifecycle::Closed("client disconnect".to_string()));
        }
    }
}

impl LoopbackServer {
    /// Deliver an event to the client's handlers
    ///
    /// Returns the number of handlers that ran; nothing is delivered while
    /// the client is closed.
    pub fn emit_to_client(&self, event: &str, payload: Value) -> usize {
        if !self.shared.open.load(Ordering::SeqCst) {
            tracing::debug!("Loopback client closed, dropping {}", event);
            return 0;
        }
        self.shared.listeners.dispatch(event, &payload)
    }

    /// Next event emitted by the client
    pub async fn recv(&self) -> Option<ClientEmit> {
        self.from_client.lock().await.recv().await
    }

    /// Next event emitted by the client, waiting at most `timeout`
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<ClientEmit> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Event already emitted by the client, if any
    pub fn try_recv(&self) -> Option<ClientEmit> {
        self.from_client.try_lock().ok()?.try_recv().ok()
    }

    /// Make subsequent `open` calls fail
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop the connection from the server side
    pub fn disconnect_client(&self, reason: &str) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            self.shared
                .listeners
                .dispatch_lifecycle(&Lifecycle::Closed(reason.to_string()));
        }
    }

    /// Raise a transport error on the client
    pub fn fail_client(&self, message: &str) {
        self.shared
            .listeners
            .dispatch_lifecycle(&Lifecycle::Error(message.to_string()));
    }

    pub fn is_client_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Number of client handlers subscribed to `event`
    pub fn client_listener_count(&self, event: &str) -> usize {
        self.shared.listeners.count_for(event)
    }

    /// Number of client subscriptions of any kind
    pub fn client_subscription_count(&self) -> usize {
        self.shared.listeners.len()
    }
}

/// Scripted backend for `--sim` sessions
///
/// Answers every `agent:execute` with two progress steps and a result.
/// Queries containing "fail" are answered with `agent:error` instead.
pub struct SimulatedAgent {
    step_delay: Duration,
}

impl Default for SimulatedAgent {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(400),
        }
    }
}

impl SimulatedAgent {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    /// Serve requests until the client side is dropped
    pub fn spawn(self, server: LoopbackServer) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(emit) = server.recv().await {
                if emit.event != EVENT_EXECUTE {
                    tracing::debug!("Simulated agent ignoring {}", emit.event);
                    continue;
                }
                match serde_json::from_value::<ExecuteRequest>(emit.payload) {
                    Ok(request) => self.handle(&server, request).await,
                    Err(e) => {
                        server.emit_to_client(
                            EVENT_ERROR,
                            json!({ "error": format!("Invalid request: {}", e) }),
                        );
                    }
                }
            }
        })
    }

    async fn handle(&self, server: &LoopbackServer, request: ExecuteRequest) {
        tracing::debug!(
            "Simulated agent received query for project {:?}",
            request.project
        );
        let project = request.project.as_deref().unwrap_or("(none)");

        server.emit_to_client(
            EVENT_PROGRESS,
            json!({ "step": "planning", "message": format!("Planning changes for {}", project) }),
        );
        tokio::time::sleep(self.step_delay).await;

        server.emit_to_client(
            EVENT_PROGRESS,
            json!({ "step": "editing", "tool": "edit_file", "message": "Applying edits" }),
        );
        tokio::time::sleep(self.step_delay).await;

        if request.query.to_lowercase().contains("fail") {
            server.emit_to_client(
                EVENT_ERROR,
                json!({ "error": "Simulated failure while applying edits" }),
            );
            return;
        }

        let summary = request.query.lines().last().unwrap_or_default().trim();
        server.emit_to_client(
            EVENT_RESULT,
            json!({
                "result": {
                    "message": format!("Done: {}", summary),
                    "project": request.project,
                    "autoCommit": request.options.auto_commit,
                }
            }),
        );
    }
}
