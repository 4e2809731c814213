//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are plain functions the model may ask to run mid-turn: look up the
//! weather, search the web, tell the time. A tool receives its JSON
//! arguments plus a [`ToolContext`] through which it can read session state,
//! stage state writes, and escalate (end an enclosing loop).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use crate::error::ToolError;
use crate::event::EventActions;
use crate::provider::ToolDefinition;
use crate::state::{State, StateDelta};

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    /// A successful plain-text result.
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// A successful structured result; `output` carries the JSON text.
    pub fn json(data: Value) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: data.to_string(),
            data: Some(data),
        }
    }

    /// A result the tool itself reports as failed.
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: false,
            output: output.into(),
            data: None,
        }
    }
}

/// What a tool can see and do besides its arguments.
///
/// Each tool call gets its own context. Reads see the session state as of
/// the call plus this call's own writes; writes are staged in a delta that
/// the invocation applies once the call returns.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Agent whose model requested the call
    pub agent_name: String,

    /// Invocation the call belongs to
    pub invocation_id: String,

    state: State,
    delta: StateDelta,
    escalate: bool,
}

impl ToolContext {
    pub fn new(agent_name: impl Into<String>, invocation_id: impl Into<String>, state: State) -> Self {
        Self {
            agent_name: agent_name.into(),
            invocation_id: invocation_id.into(),
            state,
            delta: StateDelta::new(),
            escalate: false,
        }
    }

    /// Read a state value, preferring this call's own pending writes.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.delta.get(key).or_else(|| self.state.get(key))
    }

    /// Stage a state write.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.delta.set(key, value);
    }

    /// Ask the enclosing workflow to stop iterating.
    pub fn escalate(&mut self) {
        self.escalate = true;
    }

    pub fn is_escalated(&self) -> bool {
        self.escalate
    }

    /// The state snapshot this call started from.
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn delta(&self) -> &StateDelta {
        &self.delta
    }

    /// Consume the context into the actions to record on the tool's event.
    pub fn into_actions(self) -> EventActions {
        EventActions {
            state_delta: self.delta,
            escalate: self.escalate,
        }
    }
}

/// The core Tool trait.
///
/// Each built-in tool (weather_lookup, web_search, current_time, exit_loop,
/// ...) implements this trait. Tools are registered in a [`ToolRegistry`]
/// and made available to an agent's invocation loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "weather_lookup").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value, ctx: &mut ToolContext) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Tools are held behind `Arc` so one instance can serve several agents.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Tool definitions for the LLM, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall, ctx: &mut ToolContext) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone(), ctx).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes its input and remembers it in state.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: Value, ctx: &mut ToolContext) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            ctx.set("last_echo", text.clone());
            Ok(ToolResult::text(text))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("tester", "inv-1", State::new())
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn registry_execute_tool_stamps_call_id() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hello world"}),
        };
        let mut ctx = ctx();
        let result = registry.execute(&call, &mut ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello world");
        assert_eq!(result.call_id, "call_1");
        assert_eq!(ctx.get("last_echo").unwrap(), "hello world");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry.execute(&call, &mut ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn context_reads_pending_writes_first() {
        let mut state = State::new();
        state.set("current_plan", "v1");
        let mut ctx = ToolContext::new("refiner", "inv", state);
        assert_eq!(ctx.get("current_plan").unwrap(), "v1");
        ctx.set("current_plan", "v2");
        assert_eq!(ctx.get("current_plan").unwrap(), "v2");
        assert_eq!(ctx.state().get("current_plan").unwrap(), "v1");
    }

    #[test]
    fn context_into_actions_carries_escalation() {
        let mut ctx = ctx();
        ctx.set("approved_plan", "final");
        ctx.escalate();
        let actions = ctx.into_actions();
        assert!(actions.escalate);
        assert!(actions.state_delta.get("approved_plan").is_some());
    }
}
