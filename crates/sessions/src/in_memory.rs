//! In-memory session service: for tests, single queries, and ephemeral chats.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;
use wayfarer_core::error::SessionError;
use wayfarer_core::event::Event;
use wayfarer_core::session::{Session, SessionService, SessionSummary};
use wayfarer_core::state::State;

type Key = (String, String, String);

/// Stores sessions in a map keyed by (app, user, session id).
/// Everything is lost when the process exits.
#[derive(Clone, Default)]
pub struct InMemorySessionService {
    sessions: Arc<RwLock<HashMap<Key, Session>>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(app_name: &str, user_id: &str, session_id: &str) -> Key {
        (app_name.to_string(), user_id.to_string(), session_id.to_string())
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        initial_state: State,
    ) -> Result<Session, SessionError> {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = Self::key(app_name, user_id, &id);

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(SessionError::AlreadyExists(id));
        }

        let session = Session::new(app_name, user_id, id.clone(), initial_state.persistent());
        sessions.insert(key, session.clone());
        debug!(app = app_name, user = user_id, session = %id, "Created in-memory session");
        Ok(session)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&Self::key(app_name, user_id, session_id)).cloned())
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>, SessionError> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<SessionSummary> = sessions
            .values()
            .filter(|s| s.app_name == app_name && s.user_id == user_id)
            .map(Session::summary)
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(&Self::key(app_name, user_id, session_id)).is_some())
    }

    async fn append_event(&self, session: &mut Session, event: Event) -> Result<(), SessionError> {
        let key = Self::key(&session.app_name, &session.user_id, &session.id);
        let mut sessions = self.sessions.write().await;
        let stored = sessions.get_mut(&key).ok_or_else(|| SessionError::NotFound {
            app_name: session.app_name.clone(),
            user_id: session.user_id.clone(),
            session_id: session.id.clone(),
        })?;

        let mut persisted = event.clone();
        persisted.actions.state_delta = event.actions.state_delta.persistent();
        stored.record(persisted);

        session.record(event);
        Ok(())
    }
}
