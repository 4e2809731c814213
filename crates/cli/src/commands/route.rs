//! `wayfarer route`: classify each request and hand it to a specialist.

use std::sync::Arc;
use wayfarer_agent::{Agent, Runner, final_response};
use wayfarer_core::state::State;
use wayfarer_workflow::{Dispatcher, RouteTable, SequentialAgent, is_routing_error};

use super::{prompt_line, spawn_progress, stdin_lines};
use crate::setup::{CliResult, Workspace};

pub const DISPATCHER_NAME: &str = "travel_router";

/// Router plus the four specialists it can pick from.
pub fn build_dispatcher(ws: &Workspace) -> CliResult<Dispatcher> {
    let find_and_navigate = SequentialAgent::new(
        "find_and_navigate_agent",
        vec![
            Arc::new(ws.agent("foodie_agent")?) as Arc<dyn Agent>,
            Arc::new(ws.agent("transportation_agent")?),
        ],
    )
    .with_description("Finds a place and explains how to get there");
    find_and_navigate.validate(&[])?;

    let foodie = SequentialAgent::new(
        "foodie_pipeline",
        vec![
            Arc::new(ws.agent("foodie_agent")?) as Arc<dyn Agent>,
            Arc::new(ws.agent("foodie_formatter_agent")?),
        ],
    )
    .with_description("Recommends a restaurant and returns it as a structured record");
    foodie.validate(&[])?;

    let mut routes = RouteTable::new();
    routes.insert("day_trip_agent", Arc::new(ws.agent("day_trip_agent")?))?;
    routes.insert("foodie_agent", Arc::new(foodie))?;
    routes.insert("weekend_guide_agent", Arc::new(ws.agent("weekend_guide_agent")?))?;
    routes.insert("find_and_navigate_agent", Arc::new(find_and_navigate))?;

    Ok(Dispatcher::new(DISPATCHER_NAME, ws.agent("router_agent")?, routes)
        .with_description("Routes travel requests to a specialist"))
}

pub async fn run(ws: &Workspace, queries: Vec<String>) -> CliResult {
    ws.require_api_key()?;

    let dispatcher = build_dispatcher(ws)?;
    println!("  Routes: {}", dispatcher.routes().labels().join(", "));

    let sessions = ws.sessions(false).await?;
    let runner = Runner::new(Arc::new(dispatcher), sessions, &ws.config.app_name).with_event_bus(ws.event_bus.clone());
    let progress = spawn_progress(&ws.event_bus);

    if queries.is_empty() {
        let mut lines = stdin_lines();
        while let Some(query) = prompt_line(&mut lines, "\nRequest> ").await? {
            route_one(ws, &runner, &query).await;
        }
    } else {
        for query in &queries {
            println!("\nRequest: {query}");
            route_one(ws, &runner, query).await;
        }
    }

    progress.abort();
    Ok(())
}

/// Route a single request on its own session. Failures are printed, never fatal.
async fn route_one(ws: &Workspace, runner: &Runner, query: &str) {
    let user_id = &ws.config.user_id;
    let session = match runner.create_session(user_id, None, State::new()).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("  Could not create a session: {e}");
            return;
        }
    };

    match runner.run(user_id, &session.id, query).await {
        Ok(events) => match final_response(&events) {
            Some(event) => println!("\n[{}]\n{}", event.author, event.content),
            None => println!("No final response received."),
        },
        Err(e) if is_routing_error(&e) => println!("  {e}. Skipping..."),
        Err(e) => println!("{}", wayfarer_agent::error_reply(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::test_workspace;

    #[test]
    fn dispatcher_has_every_specialist() {
        let dispatcher = build_dispatcher(&test_workspace()).unwrap();
        assert_eq!(
            dispatcher.routes().labels(),
            vec!["day_trip_agent", "foodie_agent", "weekend_guide_agent", "find_and_navigate_agent"]
        );
    }

    #[test]
    fn foodie_route_ends_in_structured_record() {
        let dispatcher = build_dispatcher(&test_workspace()).unwrap();
        let routes = dispatcher.routes();
        let foodie = routes.worker(&routes.resolve("foodie_agent").unwrap()).unwrap();
        assert_eq!(foodie.name(), "foodie_pipeline");
        assert!(foodie.writes().contains(&"structured_foodie_data".to_string()));
    }

    #[test]
    fn route_schema_lists_labels() {
        let dispatcher = build_dispatcher(&test_workspace()).unwrap();
        let schema = dispatcher.routes().schema();
        let labels = &schema.schema["properties"]["route"]["enum"];
        assert_eq!(labels.as_array().unwrap().len(), 4);
    }
}
