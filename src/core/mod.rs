//! Core domain modules
//!
//! Types, errors and pure functions shared by the transport layer, the
//! session and the CLI.

pub mod errors;
pub mod project;
pub mod types;

pub use errors::{ChannelError, ProtocolError, TransportError};
pub use project::{resolve_project, resolve_project_with};
pub use types::{
    AgentMode, AgentProgress, ChatMessage, ElementSelection, MessageMetadata, MessageType,
};
