//! Bounded critique/refine loop.
//!
//! ```text
//!            ┌──────────────────┐  approve   ┌──────────┐
//!  enter ──▶ │ AwaitingCritique │ ─────────▶ │ Approved │
//!            └──────────────────┘            └──────────┘
//!               ▲        │ criticise              ▲
//!               │        ▼                        │ escalate
//!            ┌────────────────────┐               │
//!            │ AwaitingRefinement │ ──────────────┘
//!            └────────────────────┘
//!                      │ counter == max
//!                      ▼
//!                ┌───────────┐
//!                │ Exhausted │
//!                └───────────┘
//! ```
//!
//! The candidate lives in state under `candidate_key`. The critic approves
//! by escalating (e.g. calling `exit_loop`) or by replying with exactly the
//! completion phrase; the refiner may also escalate. On approval the
//! candidate is snapshotted under `approved_key`. When the refinement count
//! reaches the cap the last candidate is returned as best effort.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wayfarer_agent::{Agent, AgentOutput, InvocationContext};
use wayfarer_core::error::Error;
use wayfarer_core::event::{DomainEvent, Event, EventActions, EventKind};
use wayfarer_core::provider::Usage;
use wayfarer_core::state::StateDelta;

use crate::dispatcher::normalize_label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingCritique,
    AwaitingRefinement,
    Approved,
    Exhausted,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingCritique => "awaiting_critique",
            Self::AwaitingRefinement => "awaiting_refinement",
            Self::Approved => "approved",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Exhausted)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopReport {
    pub final_state: LoopState,
    pub critiques: u32,
    pub refinements: u32,
    /// Approved candidate, or the last one when exhausted
    pub candidate: Option<String>,
}

impl LoopReport {
    pub fn is_approved(&self) -> bool {
        self.final_state == LoopState::Approved
    }
}

pub struct RefinementLoop {
    name: String,
    description: String,
    critic: Arc<dyn Agent>,
    refiner: Arc<dyn Agent>,
    max_iterations: u32,
    candidate_key: String,
    approved_key: String,
    completion_phrase: Option<String>,
}

impl RefinementLoop {
    /// `max_iterations` is clamped to at least one refinement round.
    pub fn new(name: impl Into<String>, critic: Arc<dyn Agent>, refiner: Arc<dyn Agent>, max_iterations: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            critic,
            refiner,
            max_iterations: max_iterations.max(1),
            candidate_key: "current_plan".into(),
            approved_key: "approved_plan".into(),
            completion_phrase: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_candidate_key(mut self, key: impl Into<String>) -> Self {
        self.candidate_key = key.into();
        self
    }

    pub fn with_approved_key(mut self, key: impl Into<String>) -> Self {
        self.approved_key = key.into();
        self
    }

    /// A critic reply that is exactly this phrase counts as approval.
    /// Case, surrounding whitespace and quotes, and a trailing period are
    /// ignored.
    pub fn with_completion_phrase(mut self, phrase: impl Into<String>) -> Self {
        let phrase = phrase.into();
        self.completion_phrase = (!phrase.trim().is_empty()).then_some(phrase);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn is_completion(&self, critique: &str) -> bool {
        self.completion_phrase
            .as_deref()
            .is_some_and(|phrase| normalize_label(critique).to_lowercase() == normalize_label(phrase).to_lowercase())
    }

    fn candidate(&self, ctx: &InvocationContext) -> Option<String> {
        ctx.state().get_text(&self.candidate_key)
    }

    fn transition(&self, ctx: &InvocationContext, from: LoopState, to: LoopState, iteration: u32) {
        debug!(loop_name = %self.name, %from, %to, iteration, "Loop transition");
        ctx.publish(DomainEvent::LoopTransition {
            loop_name: self.name.clone(),
            from: from.as_str().into(),
            to: to.as_str().into(),
            iteration,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Run the loop to a terminal state and report how it went.
    pub async fn run_with_report(&self, ctx: &mut InvocationContext) -> wayfarer_core::Result<(LoopReport, Usage)> {
        if self.candidate(ctx).is_none() {
            return Err(Error::MissingStateKey {
                agent: self.name.clone(),
                key: self.candidate_key.clone(),
            });
        }
        info!(loop_name = %self.name, max_iterations = self.max_iterations, "Starting refinement loop");

        let mut state = LoopState::AwaitingCritique;
        let mut iteration = 0u32;
        let mut critiques = 0u32;
        let mut refinements = 0u32;
        let mut usage = Usage::default();
        let mut approved: Option<Value> = None;

        while !state.is_terminal() {
            let next = match state {
                LoopState::AwaitingCritique => {
                    let previous = ctx.state().get(&self.approved_key).cloned();
                    let review = self.critic.run(ctx).await?;
                    critiques += 1;
                    usage.add(&review.usage);

                    if review.escalated || self.is_completion(&review.text) {
                        approved = Some(self.approved_value(ctx, previous, self.candidate(ctx)));
                        LoopState::Approved
                    } else {
                        LoopState::AwaitingRefinement
                    }
                }
                LoopState::AwaitingRefinement => {
                    let previous = ctx.state().get(&self.approved_key).cloned();
                    let before = self.candidate(ctx);
                    let revision = self.refiner.run(ctx).await?;
                    refinements += 1;
                    iteration += 1;
                    usage.add(&revision.usage);

                    if revision.escalated {
                        approved = Some(self.approved_value(ctx, previous, before));
                        LoopState::Approved
                    } else if iteration >= self.max_iterations {
                        LoopState::Exhausted
                    } else {
                        LoopState::AwaitingCritique
                    }
                }
                LoopState::Approved | LoopState::Exhausted => state,
            };
            self.transition(ctx, state, next, iteration);
            state = next;
        }

        let candidate = match &approved {
            Some(value) => Some(value_text(value)),
            None => self.candidate(ctx),
        };

        let mut delta = StateDelta::new();
        if let Some(value) = approved {
            delta.set(self.approved_key.clone(), value);
        } else {
            warn!(loop_name = %self.name, refinements, "Loop exhausted without approval, returning last candidate");
        }
        let event = Event::new(
            &ctx.invocation_id,
            &self.name,
            EventKind::FinalResponse,
            candidate.clone().unwrap_or_default(),
        )
        .with_actions(EventActions {
            state_delta: delta,
            escalate: false,
        });
        ctx.record(event).await?;

        info!(loop_name = %self.name, final_state = %state, critiques, refinements, "Refinement loop finished");
        Ok((
            LoopReport {
                final_state: state,
                critiques,
                refinements,
                candidate,
            },
            usage,
        ))
    }

    /// The approved value: what a tool wrote to the approved key during the
    /// step if it changed, otherwise the candidate as it stood before it.
    fn approved_value(&self, ctx: &InvocationContext, previous: Option<Value>, candidate: Option<String>) -> Value {
        match ctx.state().get(&self.approved_key) {
            Some(current) if Some(current) != previous.as_ref() => current.clone(),
            _ => Value::String(candidate.unwrap_or_default()),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Agent for RefinementLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn reads(&self) -> Vec<String> {
        let critic_writes = self.critic.writes();
        let mut reads = vec![self.candidate_key.clone()];
        let inner = self
            .critic
            .reads()
            .into_iter()
            .chain(self.refiner.reads().into_iter().filter(|k| !critic_writes.contains(k)));
        for key in inner {
            if !reads.contains(&key) {
                reads.push(key);
            }
        }
        reads
    }

    fn writes(&self) -> Vec<String> {
        let mut writes = Vec::new();
        for key in self
            .critic
            .writes()
            .into_iter()
            .chain(self.refiner.writes())
            .chain(std::iter::once(self.approved_key.clone()))
        {
            if !writes.contains(&key) {
                writes.push(key);
            }
        }
        writes
    }

    async fn run(&self, ctx: &mut InvocationContext) -> wayfarer_core::Result<AgentOutput> {
        let (report, usage) = self.run_with_report(ctx).await?;
        Ok(AgentOutput {
            text: report.candidate.unwrap_or_default(),
            structured: None,
            escalated: false,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_agent::LlmAgent;
    use wayfarer_agent::test_helpers::{ScriptedProvider, text_response, tool_call_response};
    use wayfarer_core::session::SessionService;
    use wayfarer_core::state::State;
    use wayfarer_sessions::InMemorySessionService;
    use wayfarer_tools::ExitLoopTool;

    const PHRASE: &str = "The plan is feasible and meets all constraints.";

    async fn context_with_plan(plan: &str) -> InvocationContext {
        let mut state = State::new();
        state.set("current_plan", plan);
        let sessions = Arc::new(InMemorySessionService::new());
        let session = sessions.create_session("app", "u", None, state).await.unwrap();
        InvocationContext::new(session, sessions, Some("Plan a weekend in Coorg".into()))
    }

    fn critic(provider: ScriptedProvider) -> Arc<dyn Agent> {
        Arc::new(
            LlmAgent::new("critic_agent", Arc::new(provider), "m", "Critique: {current_plan}")
                .with_output_key("criticism"),
        )
    }

    fn refiner(provider: ScriptedProvider) -> Arc<dyn Agent> {
        Arc::new(
            LlmAgent::new("refiner_agent", Arc::new(provider), "m", "Refine {current_plan} given {criticism}")
                .with_output_key("current_plan")
                .with_tool(Arc::new(ExitLoopTool::default())),
        )
    }

    #[tokio::test]
    async fn never_approving_critic_exhausts_after_max_refinements() {
        let critic = critic(ScriptedProvider::repeating("Too rushed, add rest time."));
        let refiner = refiner(ScriptedProvider::texts(&["plan v2", "plan v3", "plan v4"]));
        let refinement = RefinementLoop::new("refinement_loop", critic, refiner, 3).with_completion_phrase(PHRASE);

        let mut ctx = context_with_plan("plan v1").await;
        let (report, _) = refinement.run_with_report(&mut ctx).await.unwrap();

        assert_eq!(report.final_state, LoopState::Exhausted);
        assert_eq!(report.refinements, 3);
        assert_eq!(report.critiques, 3);
        assert_eq!(report.candidate.as_deref(), Some("plan v4"));
        assert!(!ctx.state().contains("approved_plan"));
    }

    #[tokio::test]
    async fn immediately_approving_critic_stops_after_one_critique() {
        let critic = critic(ScriptedProvider::texts(&[PHRASE]));
        let refiner_provider = Arc::new(ScriptedProvider::texts(&[]));
        let refiner: Arc<dyn Agent> = Arc::new(
            LlmAgent::new("refiner_agent", refiner_provider.clone(), "m", "Refine.").with_output_key("current_plan"),
        );
        let refinement = RefinementLoop::new("refinement_loop", critic, refiner, 3).with_completion_phrase(PHRASE);

        let mut ctx = context_with_plan("plan v1").await;
        let (report, _) = refinement.run_with_report(&mut ctx).await.unwrap();

        assert_eq!(report.final_state, LoopState::Approved);
        assert_eq!(report.critiques, 1);
        assert_eq!(report.refinements, 0);
        assert_eq!(refiner_provider.call_count(), 0);
        assert_eq!(ctx.state().get_text("approved_plan").unwrap(), "plan v1");
    }

    #[tokio::test]
    async fn quoting_the_phrase_inside_a_critique_is_not_approval() {
        let critique = format!("I cannot say \"{PHRASE}\" yet: the Madikeri to Bylakuppe drive is 90 minutes.");
        let critic = critic(ScriptedProvider::texts(&[critique.as_str()]));
        let refiner = refiner(ScriptedProvider::texts(&["plan v2"]));
        let refinement = RefinementLoop::new("refinement_loop", critic, refiner, 1).with_completion_phrase(PHRASE);

        let mut ctx = context_with_plan("plan v1").await;
        let (report, _) = refinement.run_with_report(&mut ctx).await.unwrap();

        assert_eq!(report.final_state, LoopState::Exhausted);
        assert_eq!(report.refinements, 1);
        assert_eq!(report.candidate.as_deref(), Some("plan v2"));
    }

    #[test]
    fn completion_ignores_case_quotes_and_period() {
        let refinement = RefinementLoop::new(
            "refinement_loop",
            critic(ScriptedProvider::texts(&[])),
            refiner(ScriptedProvider::texts(&[])),
            3,
        )
        .with_completion_phrase(PHRASE);

        assert!(refinement.is_completion(PHRASE));
        assert!(refinement.is_completion("  \"the plan is feasible and meets all constraints\"\n"));
        assert!(!refinement.is_completion("The plan is feasible and meets all constraints. Mostly."));
        assert!(!refinement.is_completion("Not yet."));
    }

    #[tokio::test]
    async fn refiner_exit_loop_keeps_pre_overwrite_snapshot() {
        let critic = critic(ScriptedProvider::texts(&["Needs a museum.", PHRASE]));
        let refiner = refiner(ScriptedProvider::new(vec![
            text_response("plan v2 with museum"),
            tool_call_response(vec![("exit_loop", serde_json::json!({}))]),
            text_response("Exiting the loop."),
        ]));
        // Critic approval by phrase is disabled, so only the refiner can end it.
        let refinement = RefinementLoop::new("refinement_loop", critic, refiner, 5);

        let mut ctx = context_with_plan("plan v1").await;
        let (report, _) = refinement.run_with_report(&mut ctx).await.unwrap();

        assert_eq!(report.final_state, LoopState::Approved);
        assert_eq!(report.critiques, 2);
        assert_eq!(report.refinements, 2);
        assert_eq!(report.candidate.as_deref(), Some("plan v2 with museum"));
        assert_eq!(ctx.state().get_text("approved_plan").unwrap(), "plan v2 with museum");
        assert_eq!(ctx.state().get_text("current_plan").unwrap(), "Exiting the loop.");
    }

    #[tokio::test]
    async fn missing_candidate_is_an_error() {
        let refinement = RefinementLoop::new(
            "refinement_loop",
            critic(ScriptedProvider::texts(&[])),
            refiner(ScriptedProvider::texts(&[])),
            3,
        );
        let sessions = Arc::new(InMemorySessionService::new());
        let session = sessions.create_session("app", "u", None, State::new()).await.unwrap();
        let mut ctx = InvocationContext::new(session, sessions, None);

        let err = refinement.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::MissingStateKey { ref key, .. } if key == "current_plan"));
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let critic = critic(ScriptedProvider::texts(&[PHRASE]));
        let refiner = refiner(ScriptedProvider::texts(&[]));
        let refinement = RefinementLoop::new("refinement_loop", critic, refiner, 2).with_completion_phrase(PHRASE);

        let mut ctx = context_with_plan("plan v1").await;
        let mut rx = ctx.event_bus().subscribe();
        refinement.run(&mut ctx).await.unwrap();

        let mut saw_approval = false;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::LoopTransition { to, .. } = event.as_ref() {
                saw_approval |= to == "approved";
            }
        }
        assert!(saw_approval);
    }

    #[test]
    fn declared_keys() {
        let refinement = RefinementLoop::new(
            "refinement_loop",
            critic(ScriptedProvider::texts(&[])),
            refiner(ScriptedProvider::texts(&[])),
            3,
        );
        assert_eq!(refinement.reads(), vec!["current_plan".to_string()]);
        assert_eq!(
            refinement.writes(),
            vec!["criticism".to_string(), "current_plan".to_string(), "approved_plan".to_string()]
        );
    }

    #[test]
    fn zero_iterations_clamped() {
        let refinement = RefinementLoop::new(
            "l",
            critic(ScriptedProvider::texts(&[])),
            refiner(ScriptedProvider::texts(&[])),
            0,
        );
        assert_eq!(refinement.max_iterations(), 1);
    }
}
