//! Wire protocol
//!
//! Two layers live here:
//!
//! - the agent event contract (`agent:execute`, `agent:progress`,
//!   `agent:result`, `agent:error`) and its payload types;
//! - the Engine.IO v4 / Socket.IO v5 text framing the agent server speaks,
//!   shared by the WebSocket and long-polling transports.
//!
//! Binary packets are not supported; the agent protocol is pure JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ProtocolError;

// ============================================================================
// Agent Events
// ============================================================================

/// Outbound: run a query on the agent
pub const EVENT_EXECUTE: &str = "agent:execute";
/// Inbound: status while a request is in flight
pub const EVENT_PROGRESS: &str = "agent:progress";
/// Inbound: terminal success
pub const EVENT_RESULT: &str = "agent:result";
/// Inbound: terminal failure
pub const EVENT_ERROR: &str = "agent:error";

/// Fixed execution flags sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    pub auto_commit: bool,
    pub run_tests: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            auto_commit: true,
            run_tests: false,
        }
    }
}

/// Payload of `agent:execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub query: String,
    pub project: Option<String>,
    pub user_id: String,
    pub options: ExecuteOptions,
}

/// Backend result payload
///
/// Opaque to the session except for `message`, which is displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentResult(pub Value);

impl AgentResult {
    /// Display text of the result
    ///
    /// Falls back to the compact JSON of the whole payload when the backend
    /// did not supply a `message` string.
    pub fn message(&self) -> String {
        match self.0.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => match &self.0 {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }
}

/// Payload of `agent:result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub result: AgentResult,
}

/// Payload of `agent:error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl ErrorPayload {
    /// Extract the error text from a raw payload
    ///
    /// Backends occasionally send a bare string or omit the field; those are
    /// still terminal failures and must not be dropped.
    pub fn message_from(payload: &Value) -> String {
        match payload {
            Value::String(s) => s.clone(),
            other => other
                .get("error")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| "Unknown agent error".to_string()),
        }
    }
}

// ============================================================================
// Engine.IO
// ============================================================================

/// Engine.IO protocol revision
pub const ENGINE_IO_VERSION: &str = "4";

/// Separator between packets in a long-polling payload
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Handshake data from the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Encode as a text frame
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => format!(
                "0{}",
                serde_json::to_string(handshake).unwrap_or_else(|_| "{}".to_string())
            ),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{}", data),
            Self::Pong(data) => format!("3{}", data),
            Self::Message(data) => format!("4{}", data),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    /// Decode a text frame
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let data = chars.as_str();

        match kind {
            '0' => serde_json::from_str(data)
                .map(Self::Open)
                .map_err(|e| ProtocolError::Malformed(format!("open packet: {}", e))),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data.to_string())),
            '3' => Ok(Self::Pong(data.to_string())),
            '4' => Ok(Self::Message(data.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }

    /// Decode a long-polling payload (packets joined by the record separator)
    pub fn decode_payload(payload: &str) -> Result<Vec<Self>, ProtocolError> {
        payload
            .split(RECORD_SEPARATOR)
            .filter(|frame| !frame.is_empty())
            .map(Self::decode)
            .collect()
    }

    /// Encode packets as a long-polling payload
    pub fn encode_payload(packets: &[Self]) -> String {
        packets
            .iter()
            .map(Self::encode)
            .collect::<Vec<_>>()
            .join(&RECORD_SEPARATOR.to_string())
    }
}

// ============================================================================
// Socket.IO
// ============================================================================

/// Socket.IO packet (carried inside an Engine.IO message)
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect; the server answers with `{"sid": ...}`
    Connect(Option<Value>),
    Disconnect,
    Event {
        event: String,
        data: Value,
        ack_id: Option<u64>,
    },
    Ack {
        ack_id: u64,
        data: Value,
    },
    ConnectError(Value),
}

impl SocketPacket {
    /// Build an event packet
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self::Event {
            event: event.into(),
            data,
            ack_id: None,
        }
    }

    /// Encode for the default namespace
    pub fn encode(&self) -> String {
        match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(auth)) => format!("0{}", auth),
            Self::Disconnect => "1".to_string(),
            Self::Event {
                event,
                data,
                ack_id,
            } => {
                let args = Value::Array(vec![Value::String(event.clone()), data.clone()]);
                match ack_id {
                    Some(id) => format!("2{}{}", id, args),
                    None => format!("2{}", args),
                }
            }
            Self::Ack { ack_id, data } => format!("3{}{}", ack_id, Value::Array(vec![data.clone()])),
            Self::ConnectError(data) => format!("4{}", data),
        }
    }

    /// Decode a Socket.IO packet
    ///
    /// Namespaces other than the default one are accepted and ignored.
    pub fn decode(packet: &str) -> Result<Self, ProtocolError> {
        let mut chars = packet.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        // Optional namespace: "/admin,"
        if rest.starts_with('/') {
            rest = match rest.find(',') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        }

        // Optional ack id
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        let body = &rest[digits..];

        let json = |body: &str| -> Result<Value, ProtocolError> {
            if body.is_empty() {
                Ok(Value::Null)
            } else {
                serde_json::from_str(body).map_err(|e| ProtocolError::Malformed(e.to_string()))
            }
        };

        match kind {
            '0' => {
                let data = json(body)?;
                Ok(Self::Connect(if data.is_null() { None } else { Some(data) }))
            }
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut args = match json(body)? {
                    Value::Array(args) => args.into_iter(),
                    other => {
                        return Err(ProtocolError::Malformed(format!(
                            "event arguments must be an array, got {}",
                            other
                        )))
                    }
                };
                let event = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => {
                        return Err(ProtocolError::Malformed(
                            "event name must be a string".to_string(),
                        ))
                    }
                };
                Ok(Self::Event {
                    event,
                    data: args.next().unwrap_or(Value::Null),
                    ack_id,
                })
            }
            '3' => {
                let ack_id = ack_id
                    .ok_or_else(|| ProtocolError::Malformed("ack without id".to_string()))?;
                let data = match json(body)? {
                    Value::Array(mut args) if !args.is_empty() => args.remove(0),
                    _ => Value::Null,
                };
                Ok(Self::Ack { ack_id, data })
            }
            '4' => Ok(Self::ConnectError(json(body)?)),
            other => Err(ProtocolError::UnknownSocketPacketType(other)),
        }
    }

    /// Wrap as an Engine.IO message packet
    pub fn into_engine(self) -> EnginePacket {
        EnginePacket::Message(self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_wire_shape() {
        let request = ExecuteRequest {
            query: "build X".to_string(),
            project: Some("jlm-app".to_string()),
            user_id: "anonymous".to_string(),
            options: ExecuteOptions::default(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "query": "build X",
                "project": "jlm-app",
                "userId": "anonymous",
                "options": {"autoCommit": true, "runTests": false}
            })
        );
    }

    #[test]
    fn test_result_message_fallbacks() {
        let with_message = AgentResult(json!({"message": "done", "commit": "abc123"}));
        assert_eq!(with_message.message(), "done");

        let without = AgentResult(json!({"files": 3}));
        assert_eq!(without.message(), "{\"files\":3}");

        let bare = AgentResult(json!("ok"));
        assert_eq!(bare.message(), "ok");
    }

    #[test]
    fn test_result_payload_parses() {
        let payload: ResultPayload =
            serde_json::from_value(json!({"result": {"message": "done"}})).unwrap();
        assert_eq!(payload.result.message(), "done");
    }

    #[test]
    fn test_error_message_from_variants() {
        assert_eq!(
            ErrorPayload::message_from(&json!({"error": "Build failed"})),
            "Build failed"
        );
        assert_eq!(ErrorPayload::message_from(&json!("boom")), "boom");
        assert_eq!(
            ErrorPayload::message_from(&json!({})),
            "Unknown agent error"
        );
    }

    #[test]
    fn test_decode_open_packet() {
        let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(handshake.upgrades, vec!["websocket".to_string()]);
                assert_eq!(handshake.ping_interval, 25000);
                assert_eq!(handshake.max_payload, Some(1_000_000));
            }
            other => panic!("Expected Open packet, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_engine_control_packets() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(
            EnginePacket::decode("3probe").unwrap(),
            EnginePacket::Pong("probe".to_string())
        );
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
        assert_eq!(EnginePacket::decode(""), Err(ProtocolError::Empty));
        assert_eq!(
            EnginePacket::decode("9"),
            Err(ProtocolError::UnknownPacketType('9'))
        );
    }

    #[test]
    fn test_encode_event_frame() {
        let packet = SocketPacket::event(EVENT_EXECUTE, json!({"query": "hi"})).into_engine();
        assert_eq!(packet.encode(), r#"42["agent:execute",{"query":"hi"}]"#);
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack() {
        let packet = SocketPacket::decode(r#"2/admin,12["agent:progress",{"step":"planning"}]"#)
            .unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                event: "agent:progress".to_string(),
                data: json!({"step": "planning"}),
                ack_id: Some(12),
            }
        );
    }

    #[test]
    fn test_decode_event_without_payload() {
        let packet = SocketPacket::decode(r#"2["ping"]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                event: "ping".to_string(),
                data: Value::Null,
                ack_id: None,
            }
        );
    }

    #[test]
    fn test_decode_connect_variants() {
        assert_eq!(SocketPacket::decode("0").unwrap(), SocketPacket::Connect(None));
        assert_eq!(
            SocketPacket::decode(r#"0{"sid":"abc"}"#).unwrap(),
            SocketPacket::Connect(Some(json!({"sid": "abc"})))
        );
        assert_eq!(
            SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap(),
            SocketPacket::ConnectError(json!({"message": "Not authorized"}))
        );
        assert_eq!(SocketPacket::decode("1").unwrap(), SocketPacket::Disconnect);
    }

    #[test]
    fn test_decode_malformed_event() {
        assert!(matches!(
            SocketPacket::decode(r#"2{"not":"an array"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[42]"),
            Err(ProtocolError::Malformed(_))
        ));
        assert_eq!(
            SocketPacket::decode("7"),
            Err(ProtocolError::UnknownSocketPacketType('7'))
        );
    }

    #[test]
    fn test_polling_payload_split() {
        let payload = format!(
            "40{{\"sid\":\"x\"}}{}42[\"agent:result\",{{\"result\":{{}}}}]{}2",
            RECORD_SEPARATOR, RECORD_SEPARATOR
        );
        let packets = EnginePacket::decode_payload(&payload).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2], EnginePacket::Ping(String::new()));

        let encoded = EnginePacket::encode_payload(&packets);
        assert_eq!(encoded, payload);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_event_name() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(EVENT_EXECUTE.to_string()),
            Just(EVENT_PROGRESS.to_string()),
            Just(EVENT_RESULT.to_string()),
            Just(EVENT_ERROR.to_string()),
            "[a-z]{1,10}:[a-z]{1,10}",
        ]
    }

    proptest! {
        /// Event frames survive the Engine.IO + Socket.IO layers unchanged
        #[test]
        fn prop_event_frame_round_trip(event in arb_event_name(), text in ".{0,80}", n in any::<i64>()) {
            let data = serde_json::json!({"message": text, "n": n});
            let frame = SocketPacket::event(event.clone(), data.clone()).into_engine().encode();

            let inner = match EnginePacket::decode(&frame).unwrap() {
                EnginePacket::Message(inner) => inner,
                other => panic!("Expected Message packet, got {:?}", other),
            };
            let decoded = SocketPacket::decode(&inner).unwrap();
            prop_assert_eq!(decoded, SocketPacket::Event { event, data, ack_id: None });
        }
    }
}
