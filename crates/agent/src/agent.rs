//! The `Agent` trait: anything that can take a turn in an invocation.

use async_trait::async_trait;
use serde_json::Value;
use wayfarer_core::provider::Usage;

use crate::invocation::InvocationContext;

/// What an agent produced for one run.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    /// Final reply text
    pub text: String,

    /// Parsed structured reply, when the agent has an output schema
    pub structured: Option<Value>,

    /// Whether a tool (or sub-agent) asked the enclosing loop to stop
    pub escalated: bool,

    /// Token usage summed over every model call of the run
    pub usage: Usage,
}

impl AgentOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A runnable unit: an LLM agent, or a workflow composed of agents.
///
/// `reads` and `writes` describe the agent's contract with shared session
/// state and drive static dependency checks in pipelines.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique name; used as event author and tool name.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// State keys that must exist before this agent runs.
    fn reads(&self) -> Vec<String> {
        Vec::new()
    }

    /// State keys this agent writes.
    fn writes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run one turn against the invocation's session.
    async fn run(&self, ctx: &mut InvocationContext) -> wayfarer_core::Result<AgentOutput>;
}
