//! Interpreting what the user typed, and rendering events for display.

use relay_client::ClientEvent;
use relay_core::envelope::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Text(String),
    History { offset: u64, limit: u64 },
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let mut words = command.split_whitespace();
    match words.next() {
        Some("quit") | Some("exit") => Input::Quit,
        Some("history") => {
            let offset = words.next().map(str::parse::<u64>).transpose();
            let limit = words.next().map(str::parse::<u64>).transpose();
            match (offset, limit) {
                (Ok(offset), Ok(limit)) => Input::History {
                    offset: offset.unwrap_or(0),
                    limit: limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
                },
                _ => Input::Invalid("usage: /history [offset] [limit]".into()),
            }
        }
        Some(other) => Input::Invalid(format!("unknown command: /{other}")),
        None => Input::Invalid("empty command".into()),
    }
}

/// One or more display lines for an event.
pub fn render(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Connected => "* connected".to_string(),
        ClientEvent::Authenticated(identity) => {
            format!("* signed in as {} ({})", identity.username, identity.user_id)
        }
        ClientEvent::AuthFailed { message } => format!("* authentication failed: {message}"),
        ClientEvent::Disconnected { reason } => format!("* disconnected: {reason}"),
        ClientEvent::Reconnecting { attempt, delay } => format!(
            "* reconnecting in {:.1}s (attempt {attempt})",
            delay.as_secs_f64()
        ),
        ClientEvent::Text { message, timestamp } => format!("[{timestamp}] {message}"),
        ClientEvent::Audio { data, format } => {
            format!("* audio: {} base64 chars ({format})", data.len())
        }
        ClientEvent::HistoryResponse(page) => {
            let mut lines: Vec<String> = page
                .messages
                .iter()
                .map(|m| format!("  {}: {}", m.role, m.content_text()))
                .collect();
            if page.has_more {
                lines.push("  (more available)".to_string());
            }
            if lines.is_empty() {
                "* history is empty".to_string()
            } else {
                lines.join("\n")
            }
        }
        ClientEvent::Error { message } => format!("! {message}"),
    }
}
