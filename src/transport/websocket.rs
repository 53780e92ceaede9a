//! WebSocket transport
//!
//! Engine.IO over a single persistent WebSocket. One task drains the outbound
//! queue into the socket, another reads frames and hands them to the shared
//! connection core.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::dispatch::{Flow, Outbound, SocketCore};
use super::protocol::{EnginePacket, SocketPacket};
use super::{
    engine_url, EventHandler, LifecycleHandler, ListenerId, SocketTransport, TransportKind,
    TransportOptions,
};
use crate::core::TransportError;

/// Socket.IO client over WebSocket
pub struct WebSocketTransport {
    endpoint: String,
    path: String,
    options: TransportOptions,
    core: Arc<SocketCore>,
}

impl WebSocketTransport {
    pub fn new(endpoint: &str, path: &str, options: TransportOptions) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
            options,
            core: SocketCore::new(),
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let url = engine_url(&self.endpoint, &self.path, TransportKind::WebSocket, None)?;
        tracing::debug!("Connecting WebSocket transport to {}", url);

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        // The server speaks first with the Engine.IO open packet
        let handshake = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
                    EnginePacket::Open(handshake) => break handshake,
                    other => {
                        return Err(TransportError::Handshake(format!(
                            "expected open packet, got {:?}",
                            other
                        )))
                    }
                },
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(other)) => {
                    return Err(TransportError::Handshake(format!(
                        "unexpected frame during handshake: {:?}",
                        other
                    )))
                }
                Some(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
                None => {
                    return Err(TransportError::ConnectionFailed(
                        "connection closed during handshake".to_string(),
                    ))
                }
            }
        };
        tracing::debug!(
            "Engine.IO session {} (ping interval {}ms)",
            handshake.sid,
            handshake.ping_interval
        );

        let (outbound, connect_ack) = self.core.prepare();

        sink.send(Message::Text(
            SocketPacket::Connect(None).into_engine().encode(),
        ))
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        tokio::spawn(write_loop(sink, outbound));
        self.core
            .track_reader(tokio::spawn(read_loop(source, self.core.clone())));

        connect_ack.await.map_err(|_| {
            TransportError::ConnectionFailed("dropped before namespace connect".to_string())
        })?
    }
}

async fn write_loop<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            Outbound::Close => {
                let goodbye = SocketPacket::Disconnect.into_engine().encode();
                let _ = sink.send(Message::Text(goodbye)).await;
                let _ = sink.close().await;
                break;
            }
        }
    }
}

async fn read_loop<S, E>(mut source: S, core: Arc<SocketCore>)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if core.handle_frame(&text) == Flow::Stop {
                    return;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                core.report_error(e.to_string());
                break;
            }
        }
    }
    core.mark_closed("transport closed");
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn open(&self) -> Result<(), TransportError> {
        match tokio::time::timeout(self.options.connect_timeout, self.connect()).await {
            Ok(Ok(())) => {
                tracing::info!("Connected to {} via websocket", self.endpoint);
                Ok(())
            }
            Ok(Err(e)) => {
                self.core.abandon_attempt();
                Err(e)
            }
            Err(_) => {
                self.core.abandon_attempt();
                Err(TransportError::ConnectionFailed(format!(
                    "timed out after {}s",
                    self.options.connect_timeout.as_secs()
                )))
            }
        }
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.core.emit(event, payload)
    }

    fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.core.listeners.on(event, handler)
    }

    fn on_lifecycle(&self, handler: LifecycleHandler) -> ListenerId {
        self.core.listeners.on_lifecycle(handler)
    }

    fn off(&self, id: ListenerId) {
        self.core.listeners.off(id);
    }

    fn off_all(&self) {
        self.core.listeners.clear();
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn close(&self) {
        self.core.shutdown();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.core.abandon_attempt();
    }
}
