//! SQLite session service.
//!
//! Uses a single SQLite database file with two tables:
//! - `sessions` keyed by (app_name, user_id, id), holding the JSON state
//! - `events` holding each session's ordered event log
//!
//! An appended event and the resulting state are written in one
//! transaction. The event's delta is merged into the stored state, not the
//! caller's copy. `temp:` keys never reach the database.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;
use wayfarer_core::error::SessionError;
use wayfarer_core::event::{Event, EventActions, EventKind};
use wayfarer_core::session::{Session, SessionService, SessionSummary};
use wayfarer_core::state::State;

/// A durable session store backed by SQLite.
pub struct SqliteSessionService {
    pool: SqlitePool,
}

impl SqliteSessionService {
    /// Open (or create) a database at `path`, e.g. `sqlite://wayfarer.db`.
    ///
    /// `sqlite::memory:` gives an ephemeral database on a single connection.
    pub async fn new(path: &str) -> Result<Self, SessionError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| SessionError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Each in-memory connection would otherwise see its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to open SQLite: {e}")))?;

        let service = Self { pool };
        service.run_migrations().await?;
        info!("SQLite session service initialized at {path}");
        Ok(service)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, SessionError> {
        let service = Self { pool };
        service.run_migrations().await?;
        Ok(service)
    }

    async fn run_migrations(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                app_name    TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                id          TEXT NOT NULL,
                state       TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (app_name, user_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                iid            INTEGER PRIMARY KEY AUTOINCREMENT,
                id             TEXT UNIQUE NOT NULL,
                app_name       TEXT NOT NULL,
                user_id        TEXT NOT NULL,
                session_id     TEXT NOT NULL,
                invocation_id  TEXT NOT NULL,
                author         TEXT NOT NULL,
                kind           TEXT NOT NULL,
                content        TEXT NOT NULL,
                tool_name      TEXT,
                structured     TEXT,
                actions        TEXT NOT NULL DEFAULT '{}',
                timestamp      TEXT NOT NULL,
                FOREIGN KEY (app_name, user_id, session_id)
                    REFERENCES sessions (app_name, user_id, id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::MigrationFailed(format!("events table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_session ON events(app_name, user_id, session_id, iid)")
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::MigrationFailed(format!("events index: {e}")))?;

        debug!("SQLite session migrations complete");
        Ok(())
    }

    /// Fixed-width timestamps so text ordering matches time ordering.
    fn format_time(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_time(raw: &str) -> Result<DateTime<Utc>, SessionError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SessionError::QueryFailed(format!("bad timestamp '{raw}': {e}")))
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, SessionError> {
        serde_json::from_str(raw).map_err(|e| SessionError::QueryFailed(format!("{what} column: {e}")))
    }

    fn column<T>(row: &SqliteRow, name: &str) -> Result<T, SessionError>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| SessionError::QueryFailed(format!("{name} column: {e}")))
    }

    fn row_to_event(row: &SqliteRow) -> Result<Event, SessionError> {
        let kind_raw: String = Self::column(row, "kind")?;
        let kind = EventKind::parse(&kind_raw)
            .ok_or_else(|| SessionError::QueryFailed(format!("unknown event kind '{kind_raw}'")))?;
        let structured: Option<String> = Self::column(row, "structured")?;
        let actions_raw: String = Self::column(row, "actions")?;
        let timestamp: String = Self::column(row, "timestamp")?;

        Ok(Event {
            id: Self::column(row, "id")?,
            invocation_id: Self::column(row, "invocation_id")?,
            author: Self::column(row, "author")?,
            kind,
            content: Self::column(row, "content")?,
            tool_name: Self::column(row, "tool_name")?,
            structured: structured.map(|s| Self::decode(&s, "structured")).transpose()?,
            actions: Self::decode::<EventActions>(&actions_raw, "actions")?,
            timestamp: Self::parse_time(&timestamp)?,
        })
    }

    fn encode_state(state: &State) -> Result<String, SessionError> {
        serde_json::to_string(state).map_err(|e| SessionError::Storage(format!("encode state: {e}")))
    }
}

#[async_trait]
impl SessionService for SqliteSessionService {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        initial_state: State,
    ) -> Result<Session, SessionError> {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session::new(app_name, user_id, id.clone(), initial_state.persistent());

        let result = sqlx::query(
            "INSERT INTO sessions (app_name, user_id, id, state, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(app_name)
        .bind(user_id)
        .bind(&id)
        .bind(Self::encode_state(&session.state)?)
        .bind(Self::format_time(&session.created_at))
        .bind(Self::format_time(&session.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(app = app_name, user = user_id, session = %id, "Created SQLite session");
                Ok(session)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(SessionError::AlreadyExists(id)),
            Err(e) => Err(SessionError::Storage(format!("insert session: {e}"))),
        }
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query(
            "SELECT state, created_at, updated_at FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?",
        )
        .bind(app_name)
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SessionError::QueryFailed(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_raw: String = Self::column(&row, "state")?;
        let created_at: String = Self::column(&row, "created_at")?;
        let updated_at: String = Self::column(&row, "updated_at")?;

        let event_rows = sqlx::query(
            "SELECT * FROM events WHERE app_name = ? AND user_id = ? AND session_id = ? ORDER BY iid ASC",
        )
        .bind(app_name)
        .bind(user_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::QueryFailed(e.to_string()))?;

        let events = event_rows
            .iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Session {
            id: session_id.to_string(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state: Self::decode(&state_raw, "state")?,
            events,
            created_at: Self::parse_time(&created_at)?,
            updated_at: Self::parse_time(&updated_at)?,
        }))
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>, SessionError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.updated_at,
                   (SELECT COUNT(*) FROM events e
                     WHERE e.app_name = s.app_name AND e.user_id = s.user_id AND e.session_id = s.id) AS event_count
            FROM sessions s
            WHERE s.app_name = ? AND s.user_id = ?
            ORDER BY s.updated_at DESC
            "#,
        )
        .bind(app_name)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let updated_at: String = Self::column(row, "updated_at")?;
                let event_count: i64 = Self::column(row, "event_count")?;
                Ok(SessionSummary {
                    id: Self::column(row, "id")?,
                    app_name: app_name.to_string(),
                    user_id: user_id.to_string(),
                    event_count: event_count as usize,
                    updated_at: Self::parse_time(&updated_at)?,
                })
            })
            .collect()
    }

    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?")
            .bind(app_name)
            .bind(user_id)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_event(&self, session: &mut Session, event: Event) -> Result<(), SessionError> {
        let persisted_actions = EventActions {
            state_delta: event.actions.state_delta.persistent(),
            escalate: event.actions.escalate,
        };
        let actions_json = serde_json::to_string(&persisted_actions)
            .map_err(|e| SessionError::Storage(format!("encode actions: {e}")))?;
        let structured_json = event.structured.as_ref().map(|v| v.to_string());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SessionError::Storage(format!("begin transaction: {e}")))?;

        // Touch the row first: the write lock is then held while the
        // stored state is read and merged.
        let touched = sqlx::query("UPDATE sessions SET updated_at = ? WHERE app_name = ? AND user_id = ? AND id = ?")
            .bind(Self::format_time(&event.timestamp))
            .bind(&session.app_name)
            .bind(&session.user_id)
            .bind(&session.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("update session: {e}")))?;

        if touched.rows_affected() == 0 {
            return Err(SessionError::NotFound {
                app_name: session.app_name.clone(),
                user_id: session.user_id.clone(),
                session_id: session.id.clone(),
            });
        }

        let row = sqlx::query("SELECT state FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?")
            .bind(&session.app_name)
            .bind(&session.user_id)
            .bind(&session.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| SessionError::QueryFailed(e.to_string()))?;
        let state_raw: String = Self::column(&row, "state")?;
        let mut stored_state: State = Self::decode(&state_raw, "state")?;
        stored_state.apply(&persisted_actions.state_delta);

        sqlx::query("UPDATE sessions SET state = ? WHERE app_name = ? AND user_id = ? AND id = ?")
            .bind(Self::encode_state(&stored_state)?)
            .bind(&session.app_name)
            .bind(&session.user_id)
            .bind(&session.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("update state: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO events (id, app_name, user_id, session_id, invocation_id, author, kind,
                                content, tool_name, structured, actions, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&session.app_name)
        .bind(&session.user_id)
        .bind(&session.id)
        .bind(&event.invocation_id)
        .bind(&event.author)
        .bind(event.kind.as_str())
        .bind(&event.content)
        .bind(event.tool_name.clone())
        .bind(structured_json)
        .bind(actions_json)
        .bind(Self::format_time(&event.timestamp))
        .execute(&mut *tx)
        .await
        .map_err(|e| SessionError::Storage(format!("insert event: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SessionError::Storage(format!("commit: {e}")))?;

        session.record(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::state::StateDelta;

    async fn test_service() -> SqliteSessionService {
        SqliteSessionService::new("sqlite::memory:").await.unwrap()
    }

    fn final_event(key: &str, value: &str) -> Event {
        let mut delta = StateDelta::new();
        delta.set(key, value);
        Event::new("inv-1", "planner", EventKind::FinalResponse, value)
            .with_actions(EventActions { state_delta: delta, escalate: false })
    }

    #[tokio::test]
    async fn create_and_reload() {
        let svc = test_service().await;
        let mut initial = State::new();
        initial.set("user_name", "Arjun");
        initial.set("temp:draft", "not stored");
        svc.create_session("app", "u1", Some("s1".into()), initial).await.unwrap();

        let loaded = svc.get_session("app", "u1", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.state.get_text("user_name").unwrap(), "Arjun");
        assert!(!loaded.state.contains("temp:draft"));
        assert!(loaded.events.is_empty());
    }

    #[tokio::test]
    async fn duplicate_session_rejected() {
        let svc = test_service().await;
        svc.create_session("app", "u", Some("dup".into()), State::new()).await.unwrap();
        let err = svc
            .create_session("app", "u", Some("dup".into()), State::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn append_event_persists_state_and_log() {
        let svc = test_service().await;
        let mut session = svc.create_session("app", "u", Some("s".into()), State::new()).await.unwrap();

        svc.append_event(&mut session, Event::new("inv-1", "user", EventKind::UserMessage, "Plan Jaipur"))
            .await
            .unwrap();
        svc.append_event(&mut session, final_event("current_plan", "Day 1: Amber Fort"))
            .await
            .unwrap();
        svc.append_event(&mut session, final_event("temp:note", "scratch"))
            .await
            .unwrap();

        let loaded = svc.get_session("app", "u", "s").await.unwrap().unwrap();
        assert_eq!(loaded.events.len(), 3);
        assert_eq!(loaded.events[0].kind, EventKind::UserMessage);
        assert_eq!(loaded.state.get_text("current_plan").unwrap(), "Day 1: Amber Fort");
        assert!(!loaded.state.contains("temp:note"));
        assert!(loaded.events[2].actions.state_delta.is_empty());
        assert_eq!(loaded.last_response(), Some("scratch"));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sessions.db").display());

        {
            let svc = SqliteSessionService::new(&url).await.unwrap();
            let mut session = svc.create_session("app", "u", Some("keep".into()), State::new()).await.unwrap();
            svc.append_event(&mut session, final_event("destination", "Hampi")).await.unwrap();
        }

        let svc = SqliteSessionService::new(&url).await.unwrap();
        let loaded = svc.get_session("app", "u", "keep").await.unwrap().unwrap();
        assert_eq!(loaded.state.get_text("destination").unwrap(), "Hampi");
        assert_eq!(loaded.events.len(), 1);
    }

    #[tokio::test]
    async fn list_orders_and_counts() {
        let svc = test_service().await;
        let mut first = svc.create_session("app", "u", Some("first".into()), State::new()).await.unwrap();
        svc.create_session("app", "u", Some("second".into()), State::new()).await.unwrap();
        svc.append_event(&mut first, final_event("k", "v")).await.unwrap();

        let listed = svc.list_sessions("app", "u").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "first");
        assert_eq!(listed[0].event_count, 1);
    }

    #[tokio::test]
    async fn delete_cascades_events() {
        let svc = test_service().await;
        let mut session = svc.create_session("app", "u", Some("gone".into()), State::new()).await.unwrap();
        svc.append_event(&mut session, final_event("k", "v")).await.unwrap();

        assert!(svc.delete_session("app", "u", "gone").await.unwrap());
        assert!(svc.get_session("app", "u", "gone").await.unwrap().is_none());
        assert!(svc.list_sessions("app", "u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn appends_from_stale_copies_keep_both_writes() {
        let svc = test_service().await;
        svc.create_session("app", "u", Some("shared".into()), State::new()).await.unwrap();

        let mut first = svc.get_session("app", "u", "shared").await.unwrap().unwrap();
        let mut second = svc.get_session("app", "u", "shared").await.unwrap().unwrap();
        svc.append_event(&mut first, final_event("destination", "Coorg")).await.unwrap();
        svc.append_event(&mut second, final_event("budget", "8000 INR")).await.unwrap();

        let loaded = svc.get_session("app", "u", "shared").await.unwrap().unwrap();
        assert_eq!(loaded.state.get_text("destination").unwrap(), "Coorg");
        assert_eq!(loaded.state.get_text("budget").unwrap(), "8000 INR");
        assert_eq!(loaded.events.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_event_row_is_reported() {
        let svc = test_service().await;
        let mut session = svc.create_session("app", "u", Some("bad".into()), State::new()).await.unwrap();
        svc.append_event(&mut session, final_event("k", "v")).await.unwrap();

        sqlx::query("UPDATE events SET actions = 'not json' WHERE session_id = 'bad'")
            .execute(&svc.pool)
            .await
            .unwrap();
        let err = svc.get_session("app", "u", "bad").await.unwrap_err();
        assert!(matches!(err, SessionError::QueryFailed(ref m) if m.contains("actions")));
    }

    #[tokio::test]
    async fn corrupt_timestamp_is_reported() {
        let svc = test_service().await;
        svc.create_session("app", "u", Some("old".into()), State::new()).await.unwrap();

        sqlx::query("UPDATE sessions SET updated_at = 'yesterday' WHERE id = 'old'")
            .execute(&svc.pool)
            .await
            .unwrap();
        let err = svc.list_sessions("app", "u").await.unwrap_err();
        assert!(matches!(err, SessionError::QueryFailed(ref m) if m.contains("yesterday")));
    }

    #[tokio::test]
    async fn append_to_missing_session_fails() {
        let svc = test_service().await;
        let mut orphan = Session::new("app", "u", "ghost", State::new());
        let err = svc.append_event(&mut orphan, final_event("k", "v")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }
}
