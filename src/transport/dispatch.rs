//! Connection core shared by the network transports
//!
//! Owns the listener registry, the open/closed flags and the outbound queue,
//! and interprets inbound Engine.IO frames. The WebSocket and polling
//! transports only differ in how frames travel.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::listeners::Listeners;
use super::protocol::{EnginePacket, SocketPacket};
use super::Lifecycle;
use crate::core::TransportError;

/// Item on the outbound queue
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Encoded Engine.IO frame
    Frame(String),
    /// Send the namespace disconnect and stop the writer
    Close,
}

/// What the reader loop should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

type ConnectAck = oneshot::Sender<Result<(), TransportError>>;

pub(crate) struct SocketCore {
    pub(crate) listeners: Listeners,
    open: AtomicBool,
    closed: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    connect_ack: Mutex<Option<ConnectAck>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketCore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Listeners::new(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            outbound: Mutex::new(None),
            connect_ack: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Reset state for a fresh connection attempt
    ///
    /// Returns the receiving end of the outbound queue and of the namespace
    /// connect acknowledgement.
    pub(crate) fn prepare(
        &self,
    ) -> (
        mpsc::UnboundedReceiver<Outbound>,
        oneshot::Receiver<Result<(), TransportError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.closed.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        *lock(&self.outbound) = Some(tx);
        *lock(&self.connect_ack) = Some(ack_tx);
        (rx, ack_rx)
    }

    /// Keep a reader task so `shutdown` can stop it
    pub(crate) fn track_reader(&self, handle: JoinHandle<()>) {
        lock(&self.readers).push(handle);
    }

    /// Queue a raw Engine.IO frame
    pub(crate) fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        let guard = lock(&self.outbound);
        let tx = guard.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(Outbound::Frame(frame))
            .map_err(|_| TransportError::SendFailed("writer stopped".to_string()))
    }

    /// Queue an event for the default namespace
    pub(crate) fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let frame = SocketPacket::event(event, payload).into_engine().encode();
        tracing::trace!("-> {}", frame);
        self.send_frame(frame)
    }

    /// Interpret one inbound Engine.IO frame
    pub(crate) fn handle_frame(&self, frame: &str) -> Flow {
        tracing::trace!("<- {}", frame);
        let packet = match EnginePacket::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
                return Flow::Continue;
            }
        };

        match packet {
            EnginePacket::Ping(data) => {
                if let Err(e) = self.send_frame(EnginePacket::Pong(data).encode()) {
                    tracing::debug!("Failed to answer ping: {}", e);
                }
                Flow::Continue
            }
            EnginePacket::Message(inner) => self.handle_socket_packet(&inner),
            EnginePacket::Close => {
                self.mark_closed("transport close");
                Flow::Stop
            }
            EnginePacket::Open(_)
            | EnginePacket::Pong(_)
            | EnginePacket::Upgrade
            | EnginePacket::Noop => Flow::Continue,
        }
    }

    fn handle_socket_packet(&self, inner: &str) -> Flow {
        let packet = match SocketPacket::decode(inner) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping undecodable Socket.IO packet: {}", e);
                return Flow::Continue;
            }
        };

        match packet {
            SocketPacket::Connect(_) => {
                self.open.store(true, Ordering::SeqCst);
                if let Some(ack) = lock(&self.connect_ack).take() {
                    let _ = ack.send(Ok(()));
                }
                self.listeners.dispatch_lifecycle(&Lifecycle::Opened);
                Flow::Continue
            }
            SocketPacket::Event { event, data, .. } => {
                self.listeners.dispatch(&event, &data);
                Flow::Continue
            }
            SocketPacket::ConnectError(data) => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| data.to_string());
                if let Some(ack) = lock(&self.connect_ack).take() {
                    let _ = ack.send(Err(TransportError::Handshake(message.clone())));
                }
                self.listeners
                    .dispatch_lifecycle(&Lifecycle::Error(message));
                Flow::Continue
            }
            SocketPacket::Disconnect => {
                self.mark_closed("server disconnect");
                Flow::Stop
            }
            SocketPacket::Ack { .. } => Flow::Continue,
        }
    }

    /// Report a transport-level error to lifecycle listeners
    pub(crate) fn report_error(&self, message: String) {
        if let Some(ack) = lock(&self.connect_ack).take() {
            let _ = ack.send(Err(TransportError::ConnectionFailed(message.clone())));
        }
        self.listeners.dispatch_lifecycle(&Lifecycle::Error(message));
    }

    /// Mark the connection closed; lifecycle listeners hear about it once
    pub(crate) fn mark_closed(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.outbound).take();
        if let Some(ack) = lock(&self.connect_ack).take() {
            let _ = ack.send(Err(TransportError::ConnectionFailed(reason.to_string())));
        }
        tracing::debug!("Socket closed: {}", reason);
        self.listeners
            .dispatch_lifecycle(&Lifecycle::Closed(reason.to_string()));
    }

    /// Client-initiated shutdown
    pub(crate) fn shutdown(&self) {
        let was_open = self.is_open();
        if let Some(tx) = lock(&self.outbound).take() {
            if was_open {
                let _ = tx.send(Outbound::Close);
            }
        }
        self.mark_closed("client disconnect");

        // Writers exit on `Close` or once their queue is dropped; readers are
        // parked on the network and must be aborted.
        for handle in lock(&self.readers).drain(..) {
            handle.abort();
        }
    }

    /// Tear down a connection attempt that never opened, without signalling
    pub(crate) fn abandon_attempt(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.outbound).take();
        lock(&self.connect_ack).take();
        for handle in lock(&self.readers).drain(..) {
            handle.abort();
        }
    }
}

/// Lock a std mutex, recovering from poison
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Transport mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}
