//! Classify-and-route dispatcher.
//!
//! A router agent labels the request; the label is normalized and looked up
//! in a closed [`RouteTable`]; the matching worker then handles the original
//! request on a fresh session. An unknown label is an error. There is no
//! default route.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use wayfarer_agent::{Agent, AgentOutput, InvocationContext, LlmAgent};
use wayfarer_core::error::{Error, RoutingError};
use wayfarer_core::event::{DomainEvent, Event, EventKind};
use wayfarer_core::schema::OutputSchema;
use wayfarer_core::state::State;

const QUOTES: &[char] = &['\'', '"', '`'];

/// Clean up a raw router label: surrounding whitespace, quote characters
/// and trailing periods are removed, repeatedly, until nothing changes.
pub fn normalize_label(raw: &str) -> String {
    let mut label = raw.trim();
    loop {
        let next = label.trim().trim_end_matches('.').trim_matches(QUOTES).trim();
        if next == label {
            return next.to_string();
        }
        label = next;
    }
}

/// A label known to be in the [`RouteTable`] that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteLabel(String);

impl RouteLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RouteLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of route labels and the worker behind each.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, Arc<dyn Agent>)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use each agent's name as its label.
    pub fn from_agents(agents: Vec<Arc<dyn Agent>>) -> Result<Self, RoutingError> {
        let mut table = Self::new();
        for agent in agents {
            let label = agent.name().to_string();
            table.insert(label, agent)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, label: impl Into<String>, worker: Arc<dyn Agent>) -> Result<(), RoutingError> {
        let label = label.into();
        if self.routes.iter().any(|(l, _)| *l == label) {
            return Err(RoutingError::DuplicateLabel(label));
        }
        self.routes.push((label, worker));
        Ok(())
    }

    /// Labels in insertion order.
    pub fn labels(&self) -> Vec<&str> {
        self.routes.iter().map(|(l, _)| l.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Map a raw router reply onto a table label.
    pub fn resolve(&self, raw: &str) -> Result<RouteLabel, RoutingError> {
        if self.routes.is_empty() {
            return Err(RoutingError::EmptyTable);
        }
        let label = normalize_label(raw);
        if self.routes.iter().any(|(l, _)| *l == label) {
            Ok(RouteLabel(label))
        } else {
            Err(RoutingError::Unrecognized {
                label,
                known: self.labels().into_iter().map(String::from).collect(),
            })
        }
    }

    pub fn worker(&self, label: &RouteLabel) -> Option<&Arc<dyn Agent>> {
        self.routes.iter().find(|(l, _)| l == label.as_str()).map(|(_, w)| w)
    }

    /// Structured-output schema constraining the router to the table labels.
    pub fn schema(&self) -> OutputSchema {
        OutputSchema::new(
            "route_decision",
            json!({
                "type": "object",
                "properties": {
                    "route": {
                        "type": "string",
                        "enum": self.labels(),
                        "description": "Name of the agent that should handle the request"
                    }
                },
                "required": ["route"],
                "additionalProperties": false
            }),
        )
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable").field("labels", &self.labels()).finish()
    }
}

pub struct Dispatcher {
    name: String,
    description: String,
    router: LlmAgent,
    routes: RouteTable,
}

impl Dispatcher {
    /// The router is constrained to the table's labels; replies that are
    /// not valid JSON are still read as a plain-text label.
    pub fn new(name: impl Into<String>, router: LlmAgent, routes: RouteTable) -> Self {
        let router = router.with_output_schema(routes.schema()).with_schema_fallback(true);
        Self {
            name: name.into(),
            description: String::new(),
            router,
            routes,
        }
    }

    /// Skip the response-format constraint and read plain text only.
    pub fn unconstrained(name: impl Into<String>, router: LlmAgent, routes: RouteTable) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            router,
            routes,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Run the router and resolve its reply to a label.
    pub async fn classify(&self, ctx: &mut InvocationContext) -> wayfarer_core::Result<RouteLabel> {
        let decision = self.router.run(ctx).await?;
        let raw = decision
            .structured
            .as_ref()
            .and_then(|v| v["route"].as_str())
            .map(str::to_string)
            .unwrap_or(decision.text);

        match self.routes.resolve(&raw) {
            Ok(label) => {
                info!(dispatcher = %self.name, %label, "Route selected");
                ctx.publish(DomainEvent::RouteSelected {
                    router: self.name.clone(),
                    label: label.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                Ok(label)
            }
            Err(e) => {
                warn!(dispatcher = %self.name, raw = %raw, error = %e, "Router chose an unknown route");
                ctx.publish(DomainEvent::ErrorOccurred {
                    context: format!("dispatcher:{}", self.name),
                    error_message: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                Err(e.into())
            }
        }
    }

    /// Run the worker for `label` on a fresh session with the original request.
    pub async fn dispatch(&self, label: &RouteLabel, ctx: &mut InvocationContext) -> wayfarer_core::Result<AgentOutput> {
        let worker = self.routes.worker(label).ok_or_else(|| RoutingError::Unrecognized {
            label: label.to_string(),
            known: self.routes.labels().into_iter().map(String::from).collect(),
        })?;

        let request = ctx.user_message().unwrap_or_default().to_string();
        let (app_name, user_id) = (ctx.session().app_name.clone(), ctx.session().user_id.clone());
        let session = ctx
            .session_service()
            .create_session(&app_name, &user_id, None, State::new())
            .await?;

        let mut child = ctx.child(session, Some(request.clone()));
        let user_event = Event::new(&child.invocation_id, "user", EventKind::UserMessage, &request);
        child.record(user_event).await?;

        let result = worker.run(&mut child).await;
        ctx.absorb(child);
        result
    }
}

#[async_trait]
impl Agent for Dispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn reads(&self) -> Vec<String> {
        self.router.reads()
    }

    fn writes(&self) -> Vec<String> {
        self.router.writes()
    }

    async fn run(&self, ctx: &mut InvocationContext) -> wayfarer_core::Result<AgentOutput> {
        let label = self.classify(ctx).await?;
        self.dispatch(&label, ctx).await
    }
}

/// Convenience for callers holding a bare `Error`.
pub fn is_routing_error(error: &Error) -> bool {
    matches!(error, Error::Routing(_))
}
