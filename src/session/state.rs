//! Shared session state
//!
//! Thread-safe state shared between the session, the transport handlers and
//! whatever renders the conversation. Every mutation is announced on a
//! broadcast channel so a frontend can re-render without polling.

use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use crate::core::{
    AgentMode, AgentProgress, ChatMessage, ElementSelection, MessageMetadata, MessageType,
};

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 256;

/// Change notifications for the rendering side
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message was appended to the log
    MessageAdded(ChatMessage),
    /// The log was rewritten (system entries removed); carries the full log
    MessagesReplaced(Vec<ChatMessage>),
    ModeChanged(AgentMode),
    ConnectionChanged(bool),
    ExecutingChanged(bool),
    SelectionChanged(Option<ElementSelection>),
}

/// Point-in-time copy of everything a frontend displays
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Vec<ChatMessage>,
    pub mode: AgentMode,
    pub connected: bool,
    pub executing: bool,
    pub pending_selection: Option<ElementSelection>,
    pub input_suggestion: Option<String>,
    pub selecting: bool,
}

impl SessionSnapshot {
    /// Whether the input box should accept `input`
    pub fn can_send(&self, input: &str) -> bool {
        self.connected && !self.executing && !input.trim().is_empty()
    }
}

#[derive(Debug, Default)]
struct StateInner {
    messages: Vec<ChatMessage>,
    mode: AgentMode,
    pending_selection: Option<ElementSelection>,
    input_suggestion: Option<String>,
    selecting: bool,
    next_seq: u64,
}

impl StateInner {
    fn create(&mut self, kind: MessageType, content: impl Into<String>) -> ChatMessage {
        self.next_seq += 1;
        ChatMessage::new(self.next_seq, kind, content)
    }

    /// Returns true if anything was removed
    fn strip_system(&mut self) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_system());
        self.messages.len() != before
    }
}

/// Message log, input mode and selection state of one session
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<RwLock<StateInner>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(StateInner::default())),
            events,
        }
    }

    /// Get a read lock on the inner state, recovering from poison
    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, StateInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("SessionState read lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Get a write lock on the inner state, recovering from poison
    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, StateInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("SessionState write lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Publish a notification; having no subscriber is fine
    pub fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // ========== Getters ==========

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read_inner().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.read_inner().messages.len()
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.read_inner().messages.last().cloned()
    }

    pub fn mode(&self) -> AgentMode {
        self.read_inner().mode
    }

    pub fn pending_selection(&self) -> Option<ElementSelection> {
        self.read_inner().pending_selection.clone()
    }

    pub fn input_suggestion(&self) -> Option<String> {
        self.read_inner().input_suggestion.clone()
    }

    pub fn is_selecting(&self) -> bool {
        self.read_inner().selecting
    }

    /// Snapshot with the connection flags supplied by the caller
    pub fn snapshot(&self, connected: bool, executing: bool) -> SessionSnapshot {
        let inner = self.read_inner();
        SessionSnapshot {
            messages: inner.messages.clone(),
            mode: inner.mode,
            connected,
            executing,
            pending_selection: inner.pending_selection.clone(),
            input_suggestion: inner.input_suggestion.clone(),
            selecting: inner.selecting,
        }
    }

    // ========== Message log ==========

    /// Append a message to the log
    pub fn append(&self, kind: MessageType, content: impl Into<String>) -> ChatMessage {
        let message = {
            let mut inner = self.write_inner();
            let message = inner.create(kind, content);
            inner.messages.push(message.clone());
            message
        };
        self.notify(SessionEvent::MessageAdded(message.clone()));
        message
    }

    /// Replace any transient status line with one built from `progress`
    pub fn replace_progress(&self, progress: &AgentProgress) -> ChatMessage {
        let metadata = MessageMetadata {
            tool: progress.tool.clone(),
            phase: Some(progress.step.clone()),
        };
        self.append_replacing_system(
            MessageType::System,
            progress.display_text().to_string(),
            Some(metadata),
        )
    }

    /// Append a terminal outcome, clearing any transient status line first
    pub fn append_outcome(&self, kind: MessageType, content: impl Into<String>) -> ChatMessage {
        self.append_replacing_system(kind, content, None)
    }

    fn append_replacing_system(
        &self,
        kind: MessageType,
        content: impl Into<String>,
        metadata: Option<MessageMetadata>,
    ) -> ChatMessage {
        let (message, replaced) = {
            let mut inner = self.write_inner();
            let stripped = inner.strip_system();
            let mut message = inner.create(kind, content);
            message.metadata = metadata;
            inner.messages.push(message.clone());
            let replaced = stripped.then(|| inner.messages.clone());
            (message, replaced)
        };

        match replaced {
            Some(messages) => self.notify(SessionEvent::MessagesReplaced(messages)),
            None => self.notify(SessionEvent::MessageAdded(message.clone())),
        }
        message
    }

    // ========== Mode ==========

    /// Advance to the next mode and return it
    pub fn cycle_mode(&self) -> AgentMode {
        let mode = {
            let mut inner = self.write_inner();
            inner.mode = inner.mode.next();
            inner.mode
        };
        self.notify(SessionEvent::ModeChanged(mode));
        mode
    }

    pub fn set_mode(&self, mode: AgentMode) {
        self.write_inner().mode = mode;
        self.notify(SessionEvent::ModeChanged(mode));
    }

    // ========== Selection ==========

    pub fn set_pending_selection(&self, selection: Option<ElementSelection>) {
        self.write_inner().pending_selection = selection.clone();
        self.notify(SessionEvent::SelectionChanged(selection));
    }

    /// Take the pending selection, leaving none behind
    pub fn take_pending_selection(&self) -> Option<ElementSelection> {
        let taken = self.write_inner().pending_selection.take();
        if taken.is_some() {
            self.notify(SessionEvent::SelectionChanged(None));
        }
        taken
    }

    pub fn set_input_suggestion(&self, suggestion: Option<String>) {
        self.write_inner().input_suggestion = suggestion;
    }

    /// Enter picking mode; false if a pick is already under way
    pub fn try_begin_selecting(&self) -> bool {
        let mut inner = self.write_inner();
        if inner.selecting {
            return false;
        }
        inner.selecting = true;
        true
    }

    pub fn finish_selecting(&self) {
        self.write_inner().selecting = false;
    }
}
