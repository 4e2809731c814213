//! `wayfarer plan`: draft a plan, then critique and refine it.

use std::sync::Arc;
use wayfarer_agent::{Agent, Runner};
use wayfarer_core::event::{Event, EventKind};
use wayfarer_core::state::State;
use wayfarer_workflow::{RefinementLoop, SequentialAgent};

use super::spawn_progress;
use crate::setup::{CliResult, Workspace};

pub const LOOP_NAME: &str = "refinement_loop";
pub const CANDIDATE_KEY: &str = "current_plan";
pub const APPROVED_KEY: &str = "approved_plan";

/// State key the critic's instruction reads the completion phrase from.
pub const COMPLETION_PHRASE_KEY: &str = "COMPLETION_PHRASE";

/// Planner followed by the critique/refine loop, plus the round limit the
/// loop actually enforces.
pub fn build_planner(ws: &Workspace, max_iterations: u32) -> CliResult<(SequentialAgent, u32)> {
    let refinement = RefinementLoop::new(
        LOOP_NAME,
        Arc::new(ws.agent("critic_agent")?),
        Arc::new(ws.agent("refiner_agent")?),
        max_iterations,
    )
    .with_candidate_key(CANDIDATE_KEY)
    .with_approved_key(APPROVED_KEY)
    .with_completion_phrase(&ws.config.refinement.completion_phrase)
    .with_description("Critiques and refines the plan until it is approved");
    let rounds = refinement.max_iterations();

    let pipeline = SequentialAgent::new(
        "iterative_planner_agent",
        vec![Arc::new(ws.agent("planner_agent")?) as Arc<dyn Agent>, Arc::new(refinement)],
    )
    .with_description("Drafts a plan and refines it against the user's constraints");
    pipeline.validate(&[COMPLETION_PHRASE_KEY])?;
    Ok((pipeline, rounds))
}

/// What the loop settled on.
#[derive(Debug, PartialEq)]
pub enum PlanOutcome {
    Approved(String),
    BestEffort(String),
    Missing,
}

/// Read the outcome from the loop's closing event.
pub fn plan_outcome(events: &[Event]) -> PlanOutcome {
    let closing = events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::FinalResponse && e.author == LOOP_NAME);
    let Some(event) = closing else {
        return PlanOutcome::Missing;
    };
    if event.content.trim().is_empty() {
        PlanOutcome::Missing
    } else if event.actions.state_delta.get(APPROVED_KEY).is_some() {
        PlanOutcome::Approved(event.content.clone())
    } else {
        PlanOutcome::BestEffort(event.content.clone())
    }
}

pub async fn run(ws: &Workspace, query: &str, max_iterations: Option<u32>) -> CliResult {
    ws.require_api_key()?;

    let requested = max_iterations.unwrap_or(ws.config.refinement.max_iterations);
    let (planner, rounds) = build_planner(ws, requested)?;

    let sessions = ws.sessions(false).await?;
    let runner = Runner::new(Arc::new(planner), sessions, &ws.config.app_name).with_event_bus(ws.event_bus.clone());

    let mut state = State::new();
    state.set(COMPLETION_PHRASE_KEY, ws.config.refinement.completion_phrase.as_str());
    let session = runner.create_session(&ws.config.user_id, None, state).await?;

    println!("  Planning (up to {rounds} refinement rounds)...");
    let progress = spawn_progress(&ws.event_bus);
    let result = runner.run(&ws.config.user_id, &session.id, query).await;
    progress.abort();

    let events = match result {
        Ok(events) => events,
        Err(e) => {
            println!("{}", wayfarer_agent::error_reply(&e));
            return Ok(());
        }
    };

    match plan_outcome(&events) {
        PlanOutcome::Approved(plan) => println!("\n--- Approved plan ---\n{plan}"),
        PlanOutcome::BestEffort(plan) => {
            println!("\n--- Best-effort plan (not approved after {rounds} rounds) ---\n{plan}")
        }
        PlanOutcome::Missing => println!("**FATAL:** Could not fetch the plan!"),
    }
    Ok(())
}
