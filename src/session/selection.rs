//! Element selection bridge
//!
//! The picker lives outside the session (in the browser it is a script
//! injected into the page). The session only activates it and receives at
//! most one selection per activation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::state::SessionState;
use crate::core::{ElementSelection, MessageType};

/// Called with the picked element
pub type SelectionCallback = Box<dyn FnOnce(ElementSelection) + Send>;

/// An element picker the session can drive
pub trait ElementPicker: Send + Sync {
    /// Whether the picker is ready to be activated
    fn is_loaded(&self) -> bool;

    /// Start a pick; `on_pick` runs at most once
    fn activate(&self, on_pick: SelectionCallback);

    /// Tear the picker down, dropping any armed callback
    fn unload(&self);
}

/// Apply a picked element to the session
///
/// Stores it as pending context for the next request, announces it in the
/// log and pre-fills the input.
pub fn apply_selection(state: &SessionState, selection: ElementSelection) {
    state.append(
        MessageType::System,
        format!(
            "Selected {} element: {}",
            selection.tag, selection.selector
        ),
    );
    state.set_input_suggestion(Some(selection.input_suggestion()));
    state.set_pending_selection(Some(selection));
}

/// Connects a picker to the session state
pub struct SelectionBridge {
    picker: Arc<dyn ElementPicker>,
    state: SessionState,
}

impl SelectionBridge {
    pub fn new(picker: Arc<dyn ElementPicker>, state: SessionState) -> Self {
        Self { picker, state }
    }

    pub fn picker(&self) -> &Arc<dyn ElementPicker> {
        &self.picker
    }

    /// Activate the picker
    ///
    /// Returns false when a pick is already under way or the picker is not
    /// loaded; neither case is an error.
    pub fn begin_selection(&self) -> bool {
        if self.state.is_selecting() {
            return false;
        }
        if !self.picker.is_loaded() {
            tracing::debug!("Element picker not loaded, ignoring selection request");
            return false;
        }
        if !self.state.try_begin_selecting() {
            return false;
        }

        let state = self.state.clone();
        self.picker.activate(Box::new(move |selection| {
            state.finish_selecting();
            apply_selection(&state, selection);
        }));
        true
    }

    pub fn unload(&self) {
        self.picker.unload();
        self.state.finish_selecting();
    }
}

/// Picker whose selections are delivered by the host
///
/// The CLI feeds it from `/pick <json>`; an embedding UI would feed it from
/// its own element inspector.
pub struct InjectedPicker {
    loaded: AtomicBool,
    armed: Mutex<Option<SelectionCallback>>,
}

impl Default for InjectedPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectedPicker {
    /// A loaded picker
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(true),
            armed: Mutex::new(None),
        }
    }

    /// A picker that has not been loaded yet
    pub fn unloaded() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            armed: Mutex::new(None),
        }
    }

    pub fn load(&self) {
        self.loaded.store(true, Ordering::SeqCst);
    }

    /// Whether a pick is waiting for a selection
    pub fn is_armed(&self) -> bool {
        self.armed.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Hand a selection to the armed callback
    ///
    /// Returns false if nothing was waiting for one.
    pub fn deliver(&self, selection: ElementSelection) -> bool {
        let callback = match self.armed.lock() {
            Ok(mut armed) => armed.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match callback {
            Some(callback) => {
                callback(selection);
                true
            }
            None => false,
        }
    }
}

impl ElementPicker for InjectedPicker {
    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn activate(&self, on_pick: SelectionCallback) {
        if let Ok(mut armed) = self.armed.lock() {
            *armed = Some(on_pick);
        }
    }

    fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
        if let Ok(mut armed) = self.armed.lock() {
            armed.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button() -> ElementSelection {
        ElementSelection {
            selector: "#cta".to_string(),
            tag: "button".to_string(),
            class_name: Some("primary big".to_string()),
            text_content: Some("Sign up".to_string()),
            outer_html: "<button id=\"cta\" class=\"primary big\">Sign up</button>".to_string(),
        }
    }

    #[test]
    fn test_pick_updates_state() {
        let state = SessionState::new();
        let picker = Arc::new(InjectedPicker::new());
        let bridge = SelectionBridge::new(picker.clone(), state.clone());

        assert!(bridge.begin_selection());
        assert!(state.is_selecting());
        assert!(picker.deliver(button()));

        assert!(!state.is_selecting());
        assert_eq!(state.pending_selection(), Some(button()));
        assert_eq!(
            state.last_message().unwrap().content,
            "Selected button element: #cta"
        );
        assert_eq!(
            state.input_suggestion().as_deref(),
            Some("Edit this button: \"Sign up\"")
        );
    }

    #[test]
    fn test_begin_ignored_while_selecting() {
        let state = SessionState::new();
        let picker = Arc::new(InjectedPicker::new());
        let bridge = SelectionBridge::new(picker, state);

        assert!(bridge.begin_selection());
        assert!(!bridge.begin_selection());
    }

    #[test]
    fn test_unloaded_picker_is_silent_noop() {
        let state = SessionState::new();
        let picker = Arc::new(InjectedPicker::unloaded());
        let bridge = SelectionBridge::new(picker.clone(), state.clone());

        assert!(!bridge.begin_selection());
        assert!(!state.is_selecting());
        assert!(!picker.is_armed());
        assert_eq!(state.message_count(), 0);
    }

    #[test]
    fn test_callback_runs_at_most_once() {
        let state = SessionState::new();
        let picker = Arc::new(InjectedPicker::new());
        let bridge = SelectionBridge::new(picker.clone(), state.clone());

        bridge.begin_selection();
        assert!(picker.deliver(button()));
        assert!(!picker.deliver(button()));
        assert_eq!(state.message_count(), 1);
    }

    #[test]
    fn test_unload_drops_armed_callback() {
        let state = SessionState::new();
        let picker = Arc::new(InjectedPicker::new());
        let bridge = SelectionBridge::new(picker.clone(), state.clone());

        bridge.begin_selection();
        bridge.unload();
        assert!(!picker.is_loaded());
        assert!(!picker.deliver(button()));
        assert!(!state.is_selecting());
        assert!(state.pending_selection().is_none());
    }
}
