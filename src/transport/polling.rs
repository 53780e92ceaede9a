//! HTTP long-polling transport
//!
//! Fallback for networks that block WebSocket upgrades. Inbound frames arrive
//! through a GET that the server holds open until it has something to say;
//! outbound frames are batched into POSTs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use super::dispatch::{Flow, Outbound, SocketCore};
use super::protocol::{EnginePacket, SocketPacket, RECORD_SEPARATOR};
use super::{
    engine_url, EventHandler, LifecycleHandler, ListenerId, SocketTransport, TransportKind,
    TransportOptions,
};
use crate::core::TransportError;

/// Socket.IO client over HTTP long-polling
pub struct PollingTransport {
    endpoint: String,
    path: String,
    options: TransportOptions,
    client: reqwest::Client,
    core: Arc<SocketCore>,
}

impl PollingTransport {
    pub fn new(endpoint: &str, path: &str, options: TransportOptions) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
            options,
            client: reqwest::Client::new(),
            core: SocketCore::new(),
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let url = engine_url(&self.endpoint, &self.path, TransportKind::Polling, None)?;
        tracing::debug!("Connecting polling transport to {}", url);

        let body = get_text(&self.client, url, None).await?;
        let first = body.split(RECORD_SEPARATOR).next().unwrap_or_default();
        let handshake = match EnginePacket::decode(first)? {
            EnginePacket::Open(handshake) => handshake,
            other => {
                return Err(TransportError::Handshake(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
        };
        tracing::debug!(
            "Engine.IO session {} (ping interval {}ms)",
            handshake.sid,
            handshake.ping_interval
        );

        let session_url = engine_url(
            &self.endpoint,
            &self.path,
            TransportKind::Polling,
            Some(&handshake.sid),
        )?;
        let (outbound, connect_ack) = self.core.prepare();

        post_text(
            &self.client,
            session_url.clone(),
            SocketPacket::Connect(None).into_engine().encode(),
        )
        .await?;

        // The server may hold a poll for a full ping cycle before answering
        let poll_timeout = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);

        tokio::spawn(write_loop(
            self.client.clone(),
            session_url.clone(),
            outbound,
        ));
        self.core.track_reader(tokio::spawn(read_loop(
            self.client.clone(),
            session_url,
            poll_timeout,
            self.core.clone(),
        )));

        connect_ack.await.map_err(|_| {
            TransportError::ConnectionFailed("dropped before namespace connect".to_string())
        })?
    }
}

async fn get_text(
    client: &reqwest::Client,
    url: Url,
    timeout: Option<Duration>,
) -> Result<String, TransportError> {
    let mut request = client.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let response = request
        .send()
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    let response = response
        .error_for_status()
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    response
        .text()
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
}

async fn post_text(client: &reqwest::Client, url: Url, body: String) -> Result<(), TransportError> {
    client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(body)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    Ok(())
}

async fn write_loop(
    client: reqwest::Client,
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let separator = RECORD_SEPARATOR.to_string();

    while let Some(item) = outbound.recv().await {
        let mut frames = Vec::new();
        let mut closing = false;
        let mut next = Some(item);

        // Batch whatever is already queued into one POST
        while let Some(item) = next {
            match item {
                Outbound::Frame(frame) => frames.push(frame),
                Outbound::Close => {
                    frames.push(SocketPacket::Disconnect.into_engine().encode());
                    closing = true;
                    break;
                }
            }
            next = outbound.try_recv().ok();
        }

        if let Err(e) = post_text(&client, url.clone(), frames.join(&separator)).await {
            tracing::warn!("Polling write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop(
    client: reqwest::Client,
    url: Url,
    poll_timeout: Duration,
    core: Arc<SocketCore>,
) {
    loop {
        let body = match get_text(&client, url.clone(), Some(poll_timeout)).await {
            Ok(body) => body,
            Err(e) => {
                core.report_error(e.to_string());
                break;
            }
        };

        for frame in body.split(RECORD_SEPARATOR).filter(|f| !f.is_empty()) {
            if core.handle_frame(frame) == Flow::Stop {
                return;
            }
        }
    }
    core.mark_closed("transport closed");
}

#[async_trait]
impl SocketTransport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn open(&self) -> Result<(), TransportError> {
        match tokio::time::timeout(self.options.connect_timeout, self.connect()).await {
            Ok(Ok(())) => {
                tracing::info!("Connected to {} via polling", self.endpoint);
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

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.core.abandon_attempt();
    }
}
