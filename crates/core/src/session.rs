//! Session trait: conversation identity plus shared state.
//!
//! A session pairs an (app, user, id) key with the shared [`State`] and the
//! ordered log of [`Event`]s produced by every invocation against it.
//! Backends: in-memory (discarded at exit) and SQLite (durable), both in
//! `wayfarer-sessions`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::SessionError;
use crate::event::{Event, EventKind};
use crate::state::State;

/// A conversation with its state and event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub state: State,
    #[serde(default)]
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        id: impl Into<String>,
        state: State,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            state,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an event's state delta and add it to the log.
    ///
    /// Backends call this before persisting. `temp:` keys stay visible on
    /// this in-process copy until the invocation ends.
    pub fn record(&mut self, event: Event) {
        self.state.apply(&event.actions.state_delta);
        self.updated_at = event.timestamp;
        self.events.push(event);
    }

    /// Text of the most recent final response, if any.
    pub fn last_response(&self) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::FinalResponse)
            .map(|e| e.content.as_str())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            event_count: self.events.len(),
            updated_at: self.updated_at,
        }
    }
}

/// A lightweight listing entry for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub event_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// The session store.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Create a session. A `None` id generates a fresh UUID.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        initial_state: State,
    ) -> std::result::Result<Session, SessionError>;

    /// Load a session with its full event log.
    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> std::result::Result<Option<Session>, SessionError>;

    /// List a user's sessions, most recently updated first.
    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> std::result::Result<Vec<SessionSummary>, SessionError>;

    /// Delete a session. Returns whether it existed.
    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> std::result::Result<bool, SessionError>;

    /// Record an event on `session` and persist it. `temp:` keys in the
    /// event's delta are never written to the store.
    async fn append_event(&self, session: &mut Session, event: Event) -> std::result::Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventActions;
    use crate::state::StateDelta;

    #[test]
    fn record_applies_delta_and_tracks_last_response() {
        let mut session = Session::new("trip_planner", "user_1", "s1", State::new());
        session.record(Event::new("inv", "user", EventKind::UserMessage, "Plan Goa"));

        let mut delta = StateDelta::new();
        delta.set("current_plan", "Day 1: Baga beach");
        session.record(
            Event::new("inv", "planner", EventKind::FinalResponse, "Day 1: Baga beach")
                .with_actions(EventActions { state_delta: delta, escalate: false }),
        );

        assert_eq!(session.events.len(), 2);
        assert_eq!(session.state.get_text("current_plan").unwrap(), "Day 1: Baga beach");
        assert_eq!(session.last_response(), Some("Day 1: Baga beach"));
        assert_eq!(session.summary().event_count, 2);
    }
}
