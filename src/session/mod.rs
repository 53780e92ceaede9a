//! Agent session
//!
//! Everything a frontend needs to drive a remote agent over one socket:
//!
//! - [`connection::ConnectionManager`]: transport handle and connected flag
//! - [`channel::AgentRequestChannel`]: single-flight request/response
//! - [`progress`]: progress events projected into the log
//! - [`state::SessionState`]: message log, mode and selection
//! - [`selection`]: the element picker bridge
//!
//! [`AgentSession`] ties them together. It never returns errors to its caller:
//! request failures become `error` entries in the log, connection failures
//! only clear the connected flag.

pub mod channel;
pub mod connection;
pub mod progress;
pub mod selection;
pub mod state;

pub use channel::{AgentRequestChannel, ChannelSettings, PendingExecution};
pub use connection::ConnectionManager;
pub use selection::{ElementPicker, InjectedPicker, SelectionBridge};
pub use state::{SessionEvent, SessionSnapshot, SessionState};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::core::{AgentMode, ChatMessage, ElementSelection, MessageType, TransportError};
use crate::transport::protocol::{ExecuteOptions, EVENT_PROGRESS};
use crate::transport::{SocketTransport, TransportKind, TransportOptions};

/// Build the text actually sent to the agent
///
/// The mode tag comes first, then the element tag, each on its own line,
/// then what the user typed.
pub fn compose_query(raw: &str, mode: AgentMode, selection: Option<&ElementSelection>) -> String {
    let mut query = String::new();
    if !mode.is_default() {
        query.push_str(&format!("[mode:{}]\n", mode));
    }
    if let Some(selection) = selection {
        query.push_str(&selection.context_tag());
        query.push('\n');
    }
    query.push_str(raw);
    query
}

/// Values a session is created with
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub channel: ChannelSettings,
    /// Project sent with every request
    pub project: Option<String>,
}

impl SessionSettings {
    pub fn from_config(config: &Config, user_id: String, project: Option<String>) -> Self {
        Self {
            channel: ChannelSettings {
                user_id,
                options: ExecuteOptions {
                    auto_commit: config.agent.auto_commit,
                    run_tests: config.agent.run_tests,
                },
                request_timeout: config.agent.request_timeout_secs.map(Duration::from_secs),
            },
            project,
        }
    }
}

/// One user's conversation with the remote agent
pub struct AgentSession {
    state: SessionState,
    connection: Arc<ConnectionManager>,
    channel: AgentRequestChannel,
    selection: Option<SelectionBridge>,
    project: Option<String>,
}

impl AgentSession {
    pub fn new(settings: SessionSettings) -> Self {
        let state = SessionState::new();
        let connection = Arc::new(ConnectionManager::new());

        connection.subscribe(EVENT_PROGRESS, progress::progress_handler(state.clone()));
        {
            let state = state.clone();
            connection.on_change(Arc::new(move |connected: bool| {
                state.notify(SessionEvent::ConnectionChanged(connected));
            }));
        }

        let channel = AgentRequestChannel::new(connection.clone(), settings.channel);
        {
            let state = state.clone();
            channel.on_idle(Arc::new(move || {
                state.notify(SessionEvent::ExecutingChanged(false));
            }));
        }

        Self {
            state,
            connection,
            channel,
            selection: None,
            project: settings.project,
        }
    }

    /// Attach an element picker
    pub fn with_picker(mut self, picker: Arc<dyn ElementPicker>) -> Self {
        self.selection = Some(SelectionBridge::new(picker, self.state.clone()));
        self
    }

    // ========== Connection ==========

    /// Connect over the network; failures only leave the session disconnected
    pub async fn connect(
        &self,
        endpoint: &str,
        path: &str,
        kinds: &[TransportKind],
        options: TransportOptions,
    ) {
        self.connection.connect(endpoint, path, kinds, options).await;
    }

    /// Connect over an already-built transport
    pub async fn attach(&self, transport: Arc<dyn SocketTransport>) -> Result<(), TransportError> {
        self.connection.attach(transport).await
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn transport_name(&self) -> Option<&'static str> {
        self.connection.transport_name()
    }

    // ========== State ==========

    pub fn is_executing(&self) -> bool {
        self.channel.is_executing()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.messages()
    }

    pub fn mode(&self) -> AgentMode {
        self.state.mode()
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot(self.is_connected(), self.is_executing())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.subscribe()
    }

    /// Whether `input` may be sent right now
    pub fn can_send(&self, input: &str) -> bool {
        self.is_connected() && !self.is_executing() && !input.trim().is_empty()
    }

    /// Label for the pending selection, if any
    pub fn selection_badge(&self) -> Option<String> {
        self.state.pending_selection().map(|s| s.badge())
    }

    // ========== Actions ==========

    /// Send what the user typed
    ///
    /// Returns `None` without doing anything when the input is blank, a
    /// request is in flight, or the session is disconnected. Otherwise the
    /// user's text is echoed immediately. The agent's answer (or the error) is
    /// appended as soon as the terminal event arrives, in the same step that
    /// clears `executing`; the returned task completes after that and enforces
    /// the request timeout.
    pub fn submit(&self, raw: &str) -> Option<JoinHandle<()>> {
        if raw.trim().is_empty() || self.is_executing() || !self.is_connected() {
            return None;
        }

        let selection = self.state.take_pending_selection();
        let query = compose_query(raw, self.state.mode(), selection.as_ref());

        self.state.append(MessageType::User, raw);
        self.state.set_input_suggestion(None);

        // The outcome lands in the log before the channel accepts another request
        let on_outcome = {
            let state = self.state.clone();
            Box::new(move |outcome: &channel::Outcome| match outcome {
                Ok(result) => {
                    state.append_outcome(MessageType::Agent, result.message());
                }
                Err(e) => {
                    state.append_outcome(MessageType::Error, e.to_string());
                }
            })
        };

        self.state.notify(SessionEvent::ExecutingChanged(true));
        let pending = match self
            .channel
            .begin_with(&query, self.project.as_deref(), on_outcome)
        {
            Ok(pending) => pending,
            Err(e) => {
                self.state.append(MessageType::Error, e.to_string());
                self.state.notify(SessionEvent::ExecutingChanged(false));
                return None;
            }
        };

        Some(tokio::spawn(async move {
            let request_id = pending.request_id();
            if let Err(e) = pending.wait().await {
                tracing::debug!(request_id = %request_id, "Request ended with error: {}", e);
            }
        }))
    }

    /// Switch to the next input mode
    pub fn cycle_mode(&self) -> AgentMode {
        self.state.cycle_mode()
    }

    /// Ask the picker for an element; ignored without a loaded picker
    pub fn begin_selection(&self) -> bool {
        match &self.selection {
            Some(bridge) => bridge.begin_selection(),
            None => {
                tracing::debug!("No element picker attached");
                false
            }
        }
    }

    /// Apply a selection delivered outside the picker callback
    pub fn on_element_picked(&self, selection: ElementSelection) {
        self.state.finish_selecting();
        selection::apply_selection(&self.state, selection);
    }

    /// Drop the pending selection
    pub fn clear_selection(&self) {
        self.state.set_pending_selection(None);
        self.state.set_input_suggestion(None);
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        if let Some(bridge) = &self.selection {
            bridge.unload();
        }
        self.connection.disconnect();
    }
}
