use std::sync::Arc;
use wayfarer_agent::Runner;
use wayfarer_core::state::State;

use crate::setup::{CliResult, Workspace};

pub async fn run(ws: &Workspace, agent_name: &str, query: &str) -> CliResult {
    ws.require_api_key()?;

    let agent = ws.agent(agent_name)?;
    let sessions = ws.sessions(false).await?;
    let runner = Runner::new(Arc::new(agent), sessions, &ws.config.app_name).with_event_bus(ws.event_bus.clone());

    let session = runner.create_session(&ws.config.user_id, None, State::new()).await?;
    let reply = runner.run_query(&ws.config.user_id, &session.id, query).await;
    println!("{reply}");
    Ok(())
}
