//! `exit_loop`: lets a refinement-loop agent declare the candidate final.
//!
//! Copies the current candidate to the approved key before the caller's
//! own output overwrites it, then escalates so the loop stops.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;
use wayfarer_core::error::ToolError;
use wayfarer_core::tool::{Tool, ToolContext, ToolResult};

pub struct ExitLoopTool {
    candidate_key: String,
    approved_key: String,
}

impl ExitLoopTool {
    pub fn new(candidate_key: impl Into<String>, approved_key: impl Into<String>) -> Self {
        Self {
            candidate_key: candidate_key.into(),
            approved_key: approved_key.into(),
        }
    }
}

impl Default for ExitLoopTool {
    fn default() -> Self {
        Self::new("current_plan", "approved_plan")
    }
}

#[async_trait]
impl Tool for ExitLoopTool {
    fn name(&self) -> &str {
        "exit_loop"
    }

    fn description(&self) -> &str {
        "Call this function ONLY when the plan is approved, signaling the loop should end."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value, ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        info!(agent = %ctx.agent_name, "exit_loop triggered");
        let candidate = ctx.get(&self.candidate_key).cloned().unwrap_or_else(|| json!(""));
        ctx.set(self.approved_key.clone(), candidate);
        ctx.escalate();
        Ok(ToolResult::json(json!({})))
    }
}
