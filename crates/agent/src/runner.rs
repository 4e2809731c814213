//! The runner: drives one agent against a session store.

use std::sync::Arc;
use tracing::{error, info};
use wayfarer_core::error::{Error, SessionError};
use wayfarer_core::event::{DomainEvent, Event, EventBus, EventKind};
use wayfarer_core::session::{Session, SessionService};
use wayfarer_core::state::State;

use crate::agent::Agent;
use crate::invocation::InvocationContext;

const NO_RESPONSE: &str = "No final response received.";

/// Entry point for callers: one `run` per user message.
///
/// The runner loads the session, records the user's message, runs the root
/// agent and returns every event of the invocation. Nothing is retried.
pub struct Runner {
    agent: Arc<dyn Agent>,
    sessions: Arc<dyn SessionService>,
    app_name: String,
    event_bus: Arc<EventBus>,
}

impl Runner {
    pub fn new(agent: Arc<dyn Agent>, sessions: Arc<dyn SessionService>, app_name: impl Into<String>) -> Self {
        Self {
            agent,
            sessions,
            app_name: app_name.into(),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn session_service(&self) -> &Arc<dyn SessionService> {
        &self.sessions
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Create a session for `user_id` under this runner's app.
    pub async fn create_session(
        &self,
        user_id: &str,
        session_id: Option<String>,
        initial_state: State,
    ) -> wayfarer_core::Result<Session> {
        Ok(self
            .sessions
            .create_session(&self.app_name, user_id, session_id, initial_state)
            .await?)
    }

    /// Run the agent on `message` and return the invocation's events.
    pub async fn run(&self, user_id: &str, session_id: &str, message: &str) -> wayfarer_core::Result<Vec<Event>> {
        let session = self
            .sessions
            .get_session(&self.app_name, user_id, session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                app_name: self.app_name.clone(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            })?;

        let mut ctx = InvocationContext::new(session, self.sessions.clone(), Some(message.to_string()))
            .with_event_bus(self.event_bus.clone());
        info!(
            agent = %self.agent.name(),
            session = %session_id,
            invocation = %ctx.invocation_id,
            "Starting invocation"
        );

        let user_event = Event::new(&ctx.invocation_id, "user", EventKind::UserMessage, message);
        ctx.record(user_event).await?;

        if let Err(e) = self.agent.run(&mut ctx).await {
            error!(agent = %self.agent.name(), error = %e, "Invocation failed");
            self.event_bus.publish(DomainEvent::ErrorOccurred {
                context: format!("runner:{}", self.agent.name()),
                error_message: e.to_string(),
                timestamp: chrono::Utc::now(),
            });
            let failure = Event::new(&ctx.invocation_id, self.agent.name(), EventKind::Error, e.to_string());
            if let Err(record_err) = ctx.record(failure).await {
                error!(error = %record_err, "Failed to record error event");
            }
            return Err(e);
        }

        let (_, events) = ctx.finish();
        Ok(events)
    }

    /// Run and reduce to a single reply string. Failures come back as
    /// `"An error occurred: ..."` rather than an `Err`.
    pub async fn run_query(&self, user_id: &str, session_id: &str, query: &str) -> String {
        match self.run(user_id, session_id, query).await {
            Ok(events) => final_response(&events)
                .map(|e| e.content.clone())
                .unwrap_or_else(|| NO_RESPONSE.into()),
            Err(e) => error_reply(&e),
        }
    }
}

/// The last final response among `events`.
pub fn final_response(events: &[Event]) -> Option<&Event> {
    events.iter().rev().find(|e| e.is_final())
}

/// Terminal text shown for a failed invocation.
pub fn error_reply(error: &Error) -> String {
    format!("An error occurred: {error}")
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("agent", &self.agent.name())
            .field("sessions", &self.sessions.name())
            .field("app_name", &self.app_name)
            .finish()
    }
}
