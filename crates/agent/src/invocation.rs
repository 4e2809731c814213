//! Per-invocation context shared by every agent taking part in one run.

use std::sync::Arc;
use uuid::Uuid;
use wayfarer_core::event::{DomainEvent, Event, EventBus};
use wayfarer_core::session::{Session, SessionService};
use wayfarer_core::state::State;

/// Everything an agent needs while it runs: the live session, the store
/// events are persisted to, the user's message and the event bus.
///
/// One context spans one `Runner::run` call. Composite agents pass the same
/// context to each child in turn, so children share state and event log.
pub struct InvocationContext {
    pub invocation_id: String,
    session: Session,
    sessions: Arc<dyn SessionService>,
    event_bus: Arc<EventBus>,
    user_message: Option<String>,
    user_message_taken: bool,
    events: Vec<Event>,
}

impl InvocationContext {
    pub fn new(session: Session, sessions: Arc<dyn SessionService>, user_message: Option<String>) -> Self {
        Self {
            invocation_id: Uuid::new_v4().to_string(),
            session,
            sessions,
            event_bus: Arc::new(EventBus::default()),
            user_message,
            user_message_taken: false,
            events: Vec::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// A context for a nested run on another session, inside this invocation.
    pub fn child(&self, session: Session, user_message: Option<String>) -> Self {
        Self {
            invocation_id: self.invocation_id.clone(),
            session,
            sessions: self.sessions.clone(),
            event_bus: self.event_bus.clone(),
            user_message,
            user_message_taken: false,
            events: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> &State {
        &self.session.state
    }

    pub fn session_service(&self) -> &Arc<dyn SessionService> {
        &self.sessions
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn publish(&self, event: DomainEvent) {
        self.event_bus.publish(event);
    }

    /// The original request, regardless of who consumed it.
    pub fn user_message(&self) -> Option<&str> {
        self.user_message.as_deref()
    }

    /// The user's message for the first agent that asks; `None` afterwards.
    pub fn take_user_message(&mut self) -> Option<String> {
        if self.user_message_taken {
            return None;
        }
        self.user_message_taken = true;
        self.user_message.clone()
    }

    /// Append an event to the session (applying its state delta) and
    /// remember it as part of this invocation.
    pub async fn record(&mut self, event: Event) -> wayfarer_core::Result<()> {
        self.sessions.append_event(&mut self.session, event.clone()).await?;
        self.events.push(event);
        Ok(())
    }

    /// Events produced so far in this invocation.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Fold a finished child run's events into this invocation's list.
    /// They stay on the child's session; nothing is re-persisted here.
    pub fn absorb(&mut self, child: InvocationContext) {
        self.events.extend(child.events);
    }

    /// End the invocation: `temp:` keys are dropped from the live state.
    pub fn finish(mut self) -> (Session, Vec<Event>) {
        self.session.state.clear_temp();
        (self.session, self.events)
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("session_id", &self.session.id)
            .field("events", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::event::{EventActions, EventKind};
    use wayfarer_core::state::StateDelta;
    use wayfarer_sessions::InMemorySessionService;

    async fn context(message: &str) -> InvocationContext {
        let sessions = Arc::new(InMemorySessionService::new());
        let session = sessions.create_session("app", "user", None, State::new()).await.unwrap();
        InvocationContext::new(session, sessions, Some(message.into()))
    }

    #[tokio::test]
    async fn user_message_is_handed_out_once() {
        let mut ctx = context("Plan Goa").await;
        assert_eq!(ctx.take_user_message().as_deref(), Some("Plan Goa"));
        assert_eq!(ctx.take_user_message(), None);
        assert_eq!(ctx.user_message(), Some("Plan Goa"));
    }

    #[tokio::test]
    async fn record_updates_state_and_finish_drops_temp_keys() {
        let mut ctx = context("hi").await;
        let mut delta = StateDelta::new();
        delta.set("destination", "Goa");
        delta.set("temp:scratch", "x");
        let event = Event::new(&ctx.invocation_id, "planner", EventKind::FinalResponse, "ok")
            .with_actions(EventActions { state_delta: delta, escalate: false });
        ctx.record(event).await.unwrap();

        assert!(ctx.state().contains("temp:scratch"));
        assert_eq!(ctx.events().len(), 1);

        let (session, events) = ctx.finish();
        assert_eq!(events.len(), 1);
        assert!(session.state.contains("destination"));
        assert!(!session.state.contains("temp:scratch"));
    }
}
