use std::sync::Arc;
use wayfarer_agent::Runner;
use wayfarer_core::session::Session;
use wayfarer_core::state::State;

use super::{prompt_line, stdin_lines};
use crate::setup::{CliResult, Workspace};

pub async fn run(ws: &Workspace, agent_name: &str, persist: bool, session_id: Option<String>) -> CliResult {
    ws.require_api_key()?;

    let agent = ws.agent(agent_name)?;
    let model = agent.model().to_string();
    let sessions = ws.sessions(persist).await?;
    let backend = sessions.name().to_string();
    let runner = Runner::new(Arc::new(agent), sessions, &ws.config.app_name).with_event_bus(ws.event_bus.clone());

    let session = open_session(&runner, &ws.config.user_id, session_id, persist).await?;

    println!();
    println!("  Wayfarer — {agent_name}");
    println!("  Model: {model}");
    println!("  Session: {} ({backend}, {} earlier events)", session.id, session.events.len());
    println!("  Type 'exit' or 'quit' to leave.");

    let mut lines = stdin_lines();
    while let Some(query) = prompt_line(&mut lines, "\nYou> ").await? {
        // A failed turn is shown and the conversation goes on.
        let reply = runner.run_query(&ws.config.user_id, &session.id, &query).await;
        println!("\n{agent_name}> {reply}");
    }

    println!("\n  Goodbye!");
    Ok(())
}

/// The named session, the most recent one when persisting, or a new one.
async fn open_session(
    runner: &Runner,
    user_id: &str,
    session_id: Option<String>,
    persist: bool,
) -> CliResult<Session> {
    let store = runner.session_service();
    let app_name = runner.app_name();

    let existing = match &session_id {
        Some(id) => store.get_session(app_name, user_id, id).await?,
        None if persist => match store.list_sessions(app_name, user_id).await?.first() {
            Some(latest) => store.get_session(app_name, user_id, &latest.id).await?,
            None => None,
        },
        None => None,
    };

    match existing {
        Some(session) => Ok(session),
        None => Ok(runner.create_session(user_id, session_id, State::new()).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_agent::LlmAgent;
    use wayfarer_agent::test_helpers::ScriptedProvider;
    use wayfarer_sessions::InMemorySessionService;

    fn runner() -> Runner {
        let provider = Arc::new(ScriptedProvider::repeating("Hi!"));
        let agent = LlmAgent::new("assistant", provider, "mock-model", "Be helpful.");
        Runner::new(Arc::new(agent), Arc::new(InMemorySessionService::new()), "wayfarer")
    }

    #[tokio::test]
    async fn named_session_is_created_then_resumed() {
        let runner = runner();
        let first = open_session(&runner, "u", Some("trip-1".into()), false).await.unwrap();
        assert_eq!(first.id, "trip-1");

        runner.run("u", "trip-1", "hello").await.unwrap();
        let again = open_session(&runner, "u", Some("trip-1".into()), false).await.unwrap();
        assert_eq!(again.events.len(), 2);
    }

    #[tokio::test]
    async fn persist_resumes_latest() {
        let runner = runner();
        let created = runner.create_session("u", None, State::new()).await.unwrap();
        let resumed = open_session(&runner, "u", None, true).await.unwrap();
        assert_eq!(resumed.id, created.id);
    }

    #[tokio::test]
    async fn memory_chat_starts_fresh() {
        let runner = runner();
        let created = runner.create_session("u", None, State::new()).await.unwrap();
        let fresh = open_session(&runner, "u", None, false).await.unwrap();
        assert_ne!(fresh.id, created.id);
    }
}
