pub mod agents;
pub mod ask;
pub mod chat;
pub mod plan;
pub mod route;
pub mod sessions;

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use wayfarer_core::event::{DomainEvent, EventBus};

/// Line reader over stdin for the interactive commands.
pub(crate) fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Print `prompt` without a newline and read the next non-empty line.
/// Returns `None` at end of input or on `exit`/`quit`.
pub(crate) async fn prompt_line(
    lines: &mut Lines<BufReader<Stdin>>,
    prompt: &str,
) -> std::io::Result<Option<String>> {
    loop {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit(line) {
            return Ok(None);
        }
        return Ok(Some(line.to_string()));
    }
}

pub(crate) fn is_exit(input: &str) -> bool {
    matches!(input.to_ascii_lowercase().as_str(), "exit" | "quit" | "/exit" | "/quit")
}

/// Print routing, loop and tool progress to stderr while a command runs.
/// Abort the returned handle when the command is done.
pub(crate) fn spawn_progress(bus: &Arc<EventBus>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = progress_line(&event) {
                        eprintln!("{line}");
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn progress_line(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::RouteSelected { label, .. } => Some(format!("  → routed to {label}")),
        DomainEvent::LoopTransition { from, to, iteration, .. } => {
            Some(format!("  ↻ {from} → {to} (round {iteration})"))
        }
        DomainEvent::ToolExecuted { tool_name, success: false, .. } => Some(format!("  ✗ tool {tool_name} failed")),
        DomainEvent::ToolExecuted { tool_name, .. } => Some(format!("  · used {tool_name}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_words() {
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(is_exit("/quit"));
        assert!(!is_exit("exit plan"));
    }

    #[test]
    fn progress_lines() {
        let routed = DomainEvent::RouteSelected {
            router: "travel_router".into(),
            label: "foodie_agent".into(),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(progress_line(&routed).unwrap(), "  → routed to foodie_agent");

        let started = DomainEvent::AgentStarted {
            agent: "foodie_agent".into(),
            invocation_id: "inv".into(),
            timestamp: chrono::Utc::now(),
        };
        assert!(progress_line(&started).is_none());
    }
}
