//! Events.
//!
//! Two kinds live here. [`Event`] is the durable unit of a session's log:
//! one step of an agent invocation (user turn, tool request, tool response,
//! final reply) together with the state writes it carries. [`DomainEvent`]
//! is the in-process notification broadcast on the [`EventBus`] so that
//! observers (the console, tests) can react without coupling to the
//! orchestration code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::state::StateDelta;

/// What a session event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    ToolRequested,
    ToolResponse,
    FinalResponse,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::ToolRequested => "tool_requested",
            Self::ToolResponse => "tool_response",
            Self::FinalResponse => "final_response",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_message" => Some(Self::UserMessage),
            "tool_requested" => Some(Self::ToolRequested),
            "tool_response" => Some(Self::ToolResponse),
            "final_response" => Some(Self::FinalResponse),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Side effects an event carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    /// State writes applied when the event is appended
    #[serde(default)]
    pub state_delta: StateDelta,

    /// Whether the author asked the enclosing loop to stop
    #[serde(default)]
    pub escalate: bool,
}

/// One step of an invocation, as recorded in the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,

    /// Groups all events of one `Runner::run` call
    pub invocation_id: String,

    /// "user" or the authoring agent's name
    pub author: String,

    pub kind: EventKind,

    /// Text content (message text, tool arguments or tool output)
    pub content: String,

    /// Tool name for tool events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Parsed structured reply, when the agent has an output schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,

    #[serde(default)]
    pub actions: EventActions,

    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        kind: EventKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            kind,
            content: content.into(),
            tool_name: None,
            structured: None,
            actions: EventActions::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }

    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn is_final(&self) -> bool {
        self.kind == EventKind::FinalResponse
    }
}

/// In-process notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An agent began running inside an invocation
    AgentStarted {
        agent: String,
        invocation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent generated a final response
    ResponseGenerated {
        agent: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The dispatcher resolved a route
    RouteSelected {
        router: String,
        label: String,
        timestamp: DateTime<Utc>,
    },

    /// The refinement loop changed state
    LoopTransition {
        loop_name: String,
        from: String,
        to: String,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::RouteSelected {
            router: "router_agent".into(),
            label: "foodie_agent".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::RouteSelected { label, .. } => assert_eq!(label, "foodie_agent"),
            other => panic!("Expected RouteSelected, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn event_kind_string_round_trip() {
        for kind in [
            EventKind::UserMessage,
            EventKind::ToolRequested,
            EventKind::ToolResponse,
            EventKind::FinalResponse,
            EventKind::Error,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("bogus"), None);
    }

    #[test]
    fn event_builder_sets_fields() {
        let mut delta = StateDelta::new();
        delta.set("destination", "Lonavala");
        let event = Event::new("inv", "planner", EventKind::FinalResponse, "Lonavala")
            .with_actions(EventActions { state_delta: delta, escalate: false });
        assert!(event.is_final());
        assert!(event.actions.state_delta.get("destination").is_some());
    }
}
