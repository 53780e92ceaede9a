//! agentsock: drive a remote task-execution agent over one socket
//!
//! This library provides:
//! - Socket transports (WebSocket, HTTP long-polling, in-process loopback)
//!   speaking the agent's Socket.IO event protocol
//! - A single-flight request/response channel on top of the event stream
//! - The session state a chat frontend renders: message log, input mode,
//!   progress line and element selection
//! - A line-oriented terminal frontend

pub mod cli;
pub mod config;
pub mod core;
pub mod session;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use crate::core::{AgentMode, ChannelError, ChatMessage, ElementSelection, MessageType};
pub use session::{AgentSession, SessionEvent, SessionSettings, SessionSnapshot};
