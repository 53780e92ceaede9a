//! WebSocket transport against a minimal in-test Engine.IO server

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use agentsock_cli::core::MessageType;
use agentsock_cli::session::{AgentSession, SessionSettings};
use agentsock_cli::transport::{SocketTransport, TransportKind, TransportOptions, WebSocketTransport};

const OPEN: &str =
    r#"0{"sid":"test-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

/// Frames the fake server saw from the client
type Seen = mpsc::UnboundedReceiver<String>;

/// Accept one client, complete the handshake, then run `script`
async fn spawn_server<F, Fut>(script: F) -> (String, Seen)
where
    F: FnOnce(
            futures::stream::SplitSink<
                tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
                Message,
            >,
            futures::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>>,
            mpsc::UnboundedSender<String>,
        ) -> Fut
        + Send
        + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut source) = socket.split();

        sink.send(Message::Text(OPEN.to_string())).await.unwrap();
        match source.next().await {
            Some(Ok(Message::Text(frame))) => {
                assert_eq!(frame, "40");
                seen_tx.send(frame).unwrap();
            }
            other => panic!("Expected namespace connect, got {:?}", other),
        }
        sink.send(Message::Text(r#"40{"sid":"ns-sid"}"#.to_string()))
            .await
            .unwrap();

        script(sink, source, seen_tx).await;
    });

    (endpoint, seen_rx)
}

async fn next_text<S>(source: &mut S) -> Option<String>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

fn options() -> TransportOptions {
    TransportOptions {
        connect_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_open_completes_namespace_handshake() {
    let (endpoint, mut seen) = spawn_server(|_sink, mut source, seen| async move {
        while let Some(frame) = next_text(&mut source).await {
            let _ = seen.send(frame);
        }
    })
    .await;

    let transport = WebSocketTransport::new(&endpoint, "/socket.io/", options());
    transport.open().await.unwrap();
    assert!(transport.is_open());
    assert_eq!(seen.recv().await.as_deref(), Some("40"));

    transport.close();
    assert!(!transport.is_open());
    let goodbye = tokio::time::timeout(Duration::from_secs(2), seen.recv())
        .await
        .unwrap();
    assert_eq!(goodbye.as_deref(), Some("41"));
}

#[tokio::test]
async fn test_ping_is_answered() {
    let (endpoint, mut seen) = spawn_server(|mut sink, mut source, seen| async move {
        sink.send(Message::Text("2".to_string())).await.unwrap();
        while let Some(frame) = next_text(&mut source).await {
            let _ = seen.send(frame);
        }
    })
    .await;

    let transport = WebSocketTransport::new(&endpoint, "/socket.io/", options());
    transport.open().await.unwrap();

    assert_eq!(seen.recv().await.as_deref(), Some("40"));
    let pong = tokio::time::timeout(Duration::from_secs(2), seen.recv())
        .await
        .unwrap();
    assert_eq!(pong.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_session_round_trip_over_websocket() {
    let (endpoint, mut seen) = spawn_server(|mut sink, mut source, seen| async move {
        let frame = next_text(&mut source).await.unwrap();
        let _ = seen.send(frame.clone());

        let args: Value = serde_json::from_str(frame.trim_start_matches("42")).unwrap();
        assert_eq!(args[0], "agent:execute");
        let query = args[1]["query"].as_str().unwrap().to_string();

        let progress = json!(["agent:progress", {"step": "planning", "message": "Planning"}]);
        sink.send(Message::Text(format!("42{}", progress)))
            .await
            .unwrap();
        let result = json!(["agent:result", {"result": {"message": format!("did: {}", query)}}]);
        sink.send(Message::Text(format!("42{}", result)))
            .await
            .unwrap();

        while next_text(&mut source).await.is_some() {}
    })
    .await;

    let session = AgentSession::new(SessionSettings::default());
    session
        .connect(&endpoint, "/socket.io/", &[TransportKind::WebSocket], options())
        .await;
    assert!(session.is_connected());
    assert_eq!(session.transport_name(), Some("websocket"));
    assert_eq!(seen.recv().await.as_deref(), Some("40"));

    let outcome = session.submit("rename the button").unwrap();
    tokio::time::timeout(Duration::from_secs(5), outcome)
        .await
        .unwrap()
        .unwrap();

    let sent = seen.recv().await.unwrap();
    assert!(sent.starts_with(r#"42["agent:execute""#));

    let messages = session.messages();
    let kinds: Vec<_> = messages.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageType::User, MessageType::Agent]);
    assert_eq!(messages[1].content, "did: rename the button");
    assert!(!session.is_executing());
}

#[tokio::test]
async fn test_server_disconnect_marks_session_disconnected() {
    let (endpoint, _seen) = spawn_server(|mut sink, mut source, _seen| async move {
        sink.send(Message::Text("41".to_string())).await.unwrap();
        while next_text(&mut source).await.is_some() {}
    })
    .await;

    let session = AgentSession::new(SessionSettings::default());
    session
        .connect(&endpoint, "/socket.io/", &[TransportKind::WebSocket], options())
        .await;

    for _ in 0..100 {
        if !session.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!session.is_connected());
    assert!(session.submit("anyone there?").is_none());
}
