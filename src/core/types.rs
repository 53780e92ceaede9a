//! Canonical type definitions for the session domain
//!
//! Single source of truth for the types shared by the transport, the request
//! channel and the session state machine.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Input mode selected by the user
///
/// Non-default modes are announced to the agent with a `[mode:<name>]` tag
/// prepended to the outgoing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Agent mode: the agent executes the task
    #[default]
    Agent,
    /// Ask mode: questions only, no changes
    Ask,
    /// Plan mode: propose a plan without executing it
    Plan,
    /// Comment mode: leave a remark on the selected element
    Comment,
}

impl AgentMode {
    /// All modes in cycle order
    pub const ALL: [AgentMode; 4] = [Self::Agent, Self::Ask, Self::Plan, Self::Comment];

    /// Get display label for this mode
    pub fn label(&self) -> &'static str {
        match self {
            Self::Agent => "Agent",
            Self::Ask => "Ask",
            Self::Plan => "Plan",
            Self::Comment => "Comment",
        }
    }

    /// Get icon for this mode
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Agent => "🤖",
            Self::Ask => "❓",
            Self::Plan => "📋",
            Self::Comment => "💬",
        }
    }

    /// Get description for this mode
    pub fn description(&self) -> &'static str {
        match self {
            Self::Agent => "Execute the request",
            Self::Ask => "Answer questions without making changes",
            Self::Plan => "Propose a plan, do not execute",
            Self::Comment => "Attach a comment to the selection",
        }
    }

    /// Get the next mode in the cycle (Agent → Ask → Plan → Comment → Agent)
    pub fn next(self) -> Self {
        match self {
            Self::Agent => Self::Ask,
            Self::Ask => Self::Plan,
            Self::Plan => Self::Comment,
            Self::Comment => Self::Agent,
        }
    }

    /// Whether this is the default mode (sent without a tag)
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "ask" => Ok(Self::Ask),
            "plan" => Ok(Self::Plan),
            "comment" => Ok(Self::Comment),
            other => Err(format!("Unknown mode: {}", other)),
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Ask => write!(f, "ask"),
            Self::Plan => write!(f, "plan"),
            Self::Comment => write!(f, "comment"),
        }
    }
}

/// Kind of entry in the conversation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Agent,
    System,
    Error,
}

/// Extra data carried by `system` entries projected from progress events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// One entry in the visible conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    /// Creation sequence number within the session
    #[serde(skip)]
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    pub timestamp: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    /// Create a message with the given creation sequence number
    pub fn new(seq: u64, kind: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{:06}", seq),
            seq,
            kind,
            content: content.into(),
            timestamp: Local::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageType::System
    }
}

/// Status pushed by the backend while a request is in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProgress {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl AgentProgress {
    /// Text for the status line; the step name when no message was sent
    pub fn display_text(&self) -> &str {
        if self.message.trim().is_empty() {
            &self.step
        } else {
            &self.message
        }
    }
}

/// Result of the out-of-band page element picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSelection {
    pub selector: String,
    pub tag: String,
    #[serde(rename = "className", default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(rename = "textContent", default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(rename = "outerHTML", default)]
    pub outer_html: String,
}

/// Characters of element text shown in the input suggestion
const SUGGESTION_TEXT_CHARS: usize = 30;

impl ElementSelection {
    /// Short label shown while the selection is pending (e.g. `button.primary`)
    pub fn badge(&self) -> String {
        let class = self
            .class_name
            .as_deref()
            .and_then(|c| c.split_whitespace().next());
        match class {
            Some(class) => format!("{}.{}", self.tag, class),
            None => self.tag.clone(),
        }
    }

    /// Machine-readable context tag prefixed to the next outgoing query
    pub fn context_tag(&self) -> String {
        format!("[element selector=\"{}\" tag=\"{}\"]", self.selector, self.tag)
    }

    /// Input pre-fill suggested after a pick
    pub fn input_suggestion(&self) -> String {
        let text = self
            .text_content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        match text {
            Some(text) => {
                let mut preview: String = text.chars().take(SUGGESTION_TEXT_CHARS).collect();
                if text.chars().count() > SUGGESTION_TEXT_CHARS {
                    preview.push_str("...");
                }
                format!("Edit this {}: \"{}\"", self.tag, preview)
            }
            None => format!("Edit this {}: ", self.tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(text: Option<&str>) -> ElementSelection {
        ElementSelection {
            selector: "#hero > h1".to_string(),
            tag: "h1".to_string(),
            class_name: Some("title large".to_string()),
            text_content: text.map(String::from),
            outer_html: "<h1 class=\"title large\">Welcome</h1>".to_string(),
        }
    }

    #[test]
    fn test_mode_cycle_order() {
        assert_eq!(AgentMode::Agent.next(), AgentMode::Ask);
        assert_eq!(AgentMode::Ask.next(), AgentMode::Plan);
        assert_eq!(AgentMode::Plan.next(), AgentMode::Comment);
        assert_eq!(AgentMode::Comment.next(), AgentMode::Agent);
    }

    #[test]
    fn test_mode_cycle_returns_after_four_steps() {
        for mode in AgentMode::ALL {
            assert_eq!(mode.next().next().next().next(), mode);
        }
    }

    #[test]
    fn test_mode_parse_and_display() {
        for mode in AgentMode::ALL {
            let parsed: AgentMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!("build".parse::<AgentMode>().is_err());
        assert_eq!("PLAN".parse::<AgentMode>().unwrap(), AgentMode::Plan);
    }

    #[test]
    fn test_only_agent_is_default() {
        assert!(AgentMode::Agent.is_default());
        assert!(!AgentMode::Ask.is_default());
        assert!(!AgentMode::Plan.is_default());
        assert!(!AgentMode::Comment.is_default());
    }

    #[test]
    fn test_message_ids_follow_sequence() {
        let a = ChatMessage::new(1, MessageType::User, "a");
        let b = ChatMessage::new(2, MessageType::Agent, "b");
        assert_eq!(a.id, "msg-000001");
        assert!(a.id < b.id);
    }

    #[test]
    fn test_message_serializes_type_field() {
        let msg = ChatMessage::new(3, MessageType::System, "planning").with_metadata(
            MessageMetadata {
                tool: Some("shell".to_string()),
                phase: Some("planning".to_string()),
            },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "system");
        assert_eq!(json["metadata"]["tool"], "shell");
        assert!(json.get("seq").is_none());
    }

    #[test]
    fn test_selection_json_field_names() {
        let json = r##"{"selector":"#a","tag":"div","className":"x","textContent":"hi","outerHTML":"<div>"}"##;
        let sel: ElementSelection = serde_json::from_str(json).unwrap();
        assert_eq!(sel.class_name.as_deref(), Some("x"));
        assert_eq!(sel.text_content.as_deref(), Some("hi"));
        assert_eq!(sel.outer_html, "<div>");
    }

    #[test]
    fn test_badge_uses_first_class() {
        assert_eq!(selection(None).badge(), "h1.title");
        let mut plain = selection(None);
        plain.class_name = None;
        assert_eq!(plain.badge(), "h1");
    }

    #[test]
    fn test_context_tag_contains_selector_and_tag() {
        let tag = selection(None).context_tag();
        assert!(tag.contains("#hero > h1"));
        assert!(tag.contains("tag=\"h1\""));
    }

    #[test]
    fn test_input_suggestion_truncates_text() {
        let long = "Welcome to the best landing page on the internet";
        let suggestion = selection(Some(long)).input_suggestion();
        assert_eq!(
            suggestion,
            "Edit this h1: \"Welcome to the best landing pa...\""
        );

        let short = selection(Some("  Welcome  ")).input_suggestion();
        assert_eq!(short, "Edit this h1: \"Welcome\"");

        assert_eq!(selection(None).input_suggestion(), "Edit this h1: ");
    }
}
