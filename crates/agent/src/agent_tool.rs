//! Expose an agent as a tool so an orchestrating model can delegate to it.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;
use wayfarer_core::error::ToolError;
use wayfarer_core::event::{Event, EventKind};
use wayfarer_core::session::SessionService;
use wayfarer_core::state::State;
use wayfarer_core::tool::{Tool, ToolContext, ToolResult};
use wayfarer_sessions::InMemorySessionService;

use crate::agent::Agent;
use crate::invocation::InvocationContext;

const SCRATCH_APP: &str = "agent_tool";

/// Wraps an [`Agent`] behind the [`Tool`] interface.
///
/// Each call runs the agent on a throwaway in-memory session seeded with
/// the caller's state. State keys the sub-agent writes are staged back on
/// the caller through the tool's delta.
pub struct AgentTool {
    agent: Arc<dyn Agent>,
}

impl AgentTool {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        self.agent.description()
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": { "type": "string", "description": "What to ask the agent" }
            },
            "required": ["request"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        let request = arguments["request"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'request' argument".into()))?
            .to_string();

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: self.agent.name().to_string(),
            reason,
        };

        let mut seed = ctx.state().clone();
        seed.apply(ctx.delta());

        let scratch: Arc<dyn SessionService> = Arc::new(InMemorySessionService::new());
        let session = scratch
            .create_session(SCRATCH_APP, &ctx.agent_name, None, seed.clone())
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut child = InvocationContext::new(session, scratch, Some(request.clone()));
        let user_event = Event::new(&child.invocation_id, &ctx.agent_name, EventKind::UserMessage, &request);
        child.record(user_event).await.map_err(|e| failed(e.to_string()))?;

        debug!(caller = %ctx.agent_name, agent = %self.agent.name(), "Delegating to sub-agent");
        let output = self.agent.run(&mut child).await.map_err(|e| failed(e.to_string()))?;

        let (session, _) = child.finish();
        for (key, value) in changed_keys(&seed, &session.state) {
            ctx.set(key, value);
        }

        Ok(match output.structured {
            Some(value) => ToolResult::json(value),
            None => ToolResult::text(output.text),
        })
    }
}

fn changed_keys(before: &State, after: &State) -> Vec<(String, Value)> {
    after
        .keys()
        .filter(|key| before.get(key) != after.get(key))
        .filter_map(|key| after.get(key).map(|v| (key.to_string(), v.clone())))
        .collect()
}
