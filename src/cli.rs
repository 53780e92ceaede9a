//! Line-oriented terminal frontend
//!
//! Renders session events as they arrive and reads commands from stdin.
//! Lines starting with `/` are commands; anything else is sent to the agent.

use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::core::{ChatMessage, ElementSelection, MessageType};
use crate::session::{AgentSession, InjectedPicker, SessionEvent};

/// One parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    /// Text for the agent
    Message(String),
    /// Cycle the input mode
    Mode,
    /// Arm the element picker
    Select,
    /// Deliver a picked element (JSON as produced by the page picker)
    Pick(ElementSelection),
    /// Drop the pending selection
    Clear,
    Status,
    Help,
    Quit,
    /// Blank line
    Empty,
}

/// Parse one line of REPL input
pub fn parse_line(line: &str) -> Result<ReplCommand, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ReplCommand::Empty);
    }
    if !trimmed.starts_with('/') {
        return Ok(ReplCommand::Message(line.trim_end().to_string()));
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    match command {
        "/mode" => Ok(ReplCommand::Mode),
        "/select" => Ok(ReplCommand::Select),
        "/pick" => {
            if rest.is_empty() {
                return Err("Usage: /pick {\"selector\": ..., \"tag\": ...}".to_string());
            }
            serde_json::from_str(rest)
                .map(ReplCommand::Pick)
                .map_err(|e| format!("Invalid selection JSON: {}", e))
        }
        "/clear" => Ok(ReplCommand::Clear),
        "/status" => Ok(ReplCommand::Status),
        "/help" | "/?" => Ok(ReplCommand::Help),
        "/quit" | "/exit" | "/q" => Ok(ReplCommand::Quit),
        other => Err(format!("Unknown command: {} (try /help)", other)),
    }
}

/// Terminal rendering of one log entry
pub fn render_message(message: &ChatMessage) -> String {
    match message.kind {
        MessageType::User => format!("{} {}", "you ›".bold().blue(), message.content),
        MessageType::Agent => format!("{} {}", "agent ›".bold().green(), message.content),
        MessageType::System => {
            let tool = message
                .metadata
                .as_ref()
                .and_then(|m| m.tool.as_deref())
                .map(|t| format!(" [{}]", t))
                .unwrap_or_default();
            format!("  {}{}", message.content.dimmed(), tool.dimmed())
        }
        MessageType::Error => format!("{} {}", "error ›".bold().red(), message.content.red()),
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::MessageAdded(message) => println!("{}", render_message(message)),
        // The replacement carries the whole log; only its tail is new
        SessionEvent::MessagesReplaced(messages) => {
            if let Some(message) = messages.last() {
                println!("{}", render_message(message));
            }
        }
        SessionEvent::ModeChanged(mode) => {
            println!(
                "{} {} {}",
                "Mode:".bold(),
                mode.icon(),
                mode.label().cyan()
            );
        }
        SessionEvent::ConnectionChanged(true) => println!("{}", "● connected".green()),
        SessionEvent::ConnectionChanged(false) => println!("{}", "○ disconnected".yellow()),
        SessionEvent::SelectionChanged(Some(selection)) => {
            println!("{} {}", "Selection:".bold(), selection.badge().cyan());
        }
        SessionEvent::ExecutingChanged(_) | SessionEvent::SelectionChanged(None) => {}
    }
}

fn print_help() {
    println!("{}", "=== agentsock commands ===".bold().cyan());
    println!("  {:<16} cycle input mode (agent → ask → plan → comment)", "/mode");
    println!("  {:<16} arm the element picker", "/select");
    println!("  {:<16} deliver a picked element", "/pick <json>");
    println!("  {:<16} drop the pending selection", "/clear");
    println!("  {:<16} show connection and session state", "/status");
    println!("  {:<16} leave", "/quit");
}

fn print_status(session: &AgentSession) {
    let snapshot = session.snapshot();
    let connection = if snapshot.connected {
        format!(
            "connected via {}",
            session.transport_name().unwrap_or("unknown")
        )
        .green()
    } else {
        "disconnected".to_string().yellow()
    };

    println!("{}", "=== Session Status ===".bold().cyan());
    println!("  {:<12} {}", "Connection:".bold(), connection);
    println!(
        "  {:<12} {}",
        "Project:".bold(),
        session.project().unwrap_or("(none)")
    );
    println!(
        "  {:<12} {} {}",
        "Mode:".bold(),
        snapshot.mode.icon(),
        snapshot.mode.label()
    );
    println!(
        "  {:<12} {}",
        "Agent:".bold(),
        if snapshot.executing { "working" } else { "idle" }
    );
    if let Some(badge) = session.selection_badge() {
        println!("  {:<12} {}", "Selection:".bold(), badge.cyan());
    }
    println!("  {:<12} {}", "Messages:".bold(), snapshot.messages.len());
}

/// Interactive chat loop
pub async fn run_chat(session: AgentSession, picker: Arc<InjectedPicker>) -> Result<()> {
    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Terminal fell behind, {} session events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{}", "=== agentsock chat ===".bold().cyan());
    if session.is_connected() {
        println!(
            "{} via {}",
            "● connected".green(),
            session.transport_name().unwrap_or("unknown")
        );
    } else {
        println!(
            "{}",
            "○ not connected to the agent server; messages cannot be sent".yellow()
        );
    }
    println!("{}", "Type /help for commands.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e.yellow());
                continue;
            }
        };

        match command {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => print_help(),
            ReplCommand::Status => print_status(&session),
            ReplCommand::Mode => {
                session.cycle_mode();
            }
            ReplCommand::Select => {
                if session.begin_selection() {
                    println!("{}", "Picker armed; deliver with /pick <json>".dimmed());
                } else {
                    println!("{}", "Picker unavailable".dimmed());
                }
            }
            ReplCommand::Pick(selection) => {
                if !picker.deliver(selection.clone()) {
                    session.on_element_picked(selection);
                }
                if let Some(suggestion) = session.snapshot().input_suggestion {
                    println!("{} {}", "Suggestion:".dimmed(), suggestion);
                }
            }
            ReplCommand::Clear => session.clear_selection(),
            ReplCommand::Message(text) => {
                if !session.is_connected() {
                    println!("{}", "Not connected to the agent server".yellow());
                } else if session.is_executing() {
                    println!("{}", "Agent is still working on the previous request".yellow());
                } else {
                    session.submit(&text);
                }
            }
        }
    }

    drop(session);
    printer.abort();
    Ok(())
}

/// Send one query, print the exchange and return whether it succeeded
pub async fn run_exec(session: AgentSession, query: &str) -> Result<bool> {
    if !session.is_connected() {
        anyhow::bail!("Not connected to agent server");
    }

    if query.trim().is_empty() {
        anyhow::bail!("Query is empty");
    }

    let mut events = session.subscribe();
    let Some(mut outcome) = session.submit(query) else {
        // A send failure leaves its reason in the log
        let reason = session
            .messages()
            .last()
            .filter(|m| m.kind == MessageType::Error)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "agent is busy with another request".to_string());
        anyhow::bail!("Request not sent: {}", reason);
    };

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            joined = &mut outcome => {
                joined?;
                break;
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    let succeeded = session
        .messages()
        .last()
        .map(|m| m.kind == MessageType::Agent)
        .unwrap_or(false);
    Ok(succeeded)
}

/// Print the effective configuration
pub fn print_config(config: &Config, path: Option<&std::path::Path>) -> Result<()> {
    if let Some(path) = path {
        println!("{} {}", "Config file:".bold(), path.display());
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            parse_line("make the header blue  \n").unwrap(),
            ReplCommand::Message("make the header blue".to_string())
        );
        assert_eq!(parse_line("   ").unwrap(), ReplCommand::Empty);
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_line("/mode").unwrap(), ReplCommand::Mode);
        assert_eq!(parse_line("/select").unwrap(), ReplCommand::Select);
        assert_eq!(parse_line(" /clear ").unwrap(), ReplCommand::Clear);
        assert_eq!(parse_line("/q").unwrap(), ReplCommand::Quit);
        assert!(parse_line("/frobnicate").is_err());
    }

    #[test]
    fn test_pick_parses_selection_json() {
        let line = r##"/pick {"selector":"#cta","tag":"button","className":"primary","textContent":"Go","outerHTML":"<button>Go</button>"}"##;
        match parse_line(line).unwrap() {
            ReplCommand::Pick(selection) => {
                assert_eq!(selection.selector, "#cta");
                assert_eq!(selection.class_name.as_deref(), Some("primary"));
                assert_eq!(selection.outer_html, "<button>Go</button>");
            }
            other => panic!("Expected Pick, got {:?}", other),
        }
        assert!(parse_line("/pick").is_err());
        assert!(parse_line("/pick {not json}").is_err());
    }

    async fn connected_session() -> (AgentSession, crate::transport::LoopbackServer) {
        let session = AgentSession::new(crate::session::SessionSettings::default());
        let (client, server) = crate::transport::LoopbackTransport::pair();
        session.attach(client).await.unwrap();
        (session, server)
    }

    #[tokio::test]
    async fn test_exec_blank_query_is_rejected_as_empty() {
        let (session, server) = connected_session().await;
        let err = run_exec(session, "   ").await.unwrap_err();
        assert_eq!(err.to_string(), "Query is empty");
        assert!(server.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_exec_while_busy_reports_busy() {
        let (session, server) = connected_session().await;
        let _first = session.submit("first").unwrap();
        server.recv().await.unwrap();

        let err = run_exec(session, "second").await.unwrap_err();
        assert!(err.to_string().contains("busy"), "got: {}", err);
        assert!(server.try_recv().is_none());
    }

    #[test]
    fn test_render_includes_content() {
        colored::control::set_override(false);
        let message = ChatMessage::new(1, MessageType::Error, "Build failed");
        assert_eq!(render_message(&message), "error › Build failed");
    }
}
