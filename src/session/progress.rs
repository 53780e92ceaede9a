//! Progress projection
//!
//! `agent:progress` events are not stored as history. Each one replaces the
//! previous status line, so the log carries at most one `system` entry while a
//! request runs.

use serde_json::Value;
use std::sync::Arc;

use super::state::SessionState;
use crate::core::{AgentProgress, ChatMessage};
use crate::transport::EventHandler;

/// Apply one raw progress payload to the session log
///
/// Undecodable payloads are logged and ignored.
pub fn project_progress(state: &SessionState, payload: Value) -> Option<ChatMessage> {
    match serde_json::from_value::<AgentProgress>(payload) {
        Ok(progress) => {
            tracing::debug!(
                "Agent progress: step={} tool={:?}",
                progress.step,
                progress.tool
            );
            Some(state.replace_progress(&progress))
        }
        Err(e) => {
            tracing::warn!("Ignoring malformed progress event: {}", e);
            None
        }
    }
}

/// Transport handler that projects progress into `state`
pub fn progress_handler(state: SessionState) -> EventHandler {
    Arc::new(move |payload: Value| {
        project_progress(&state, payload);
    })
}
