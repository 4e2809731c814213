//! Wrap a plain closure as a [`Tool`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use wayfarer_core::error::ToolError;
use wayfarer_core::tool::{Tool, ToolContext, ToolResult};

type ToolFn = dyn Fn(Value, &mut ToolContext) -> Result<Value, ToolError> + Send + Sync;

/// A tool whose body is a synchronous closure.
///
/// A string return value becomes plain text output; anything else is
/// returned as structured JSON.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    func: Arc<ToolFn>,
}

impl FunctionTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, parameters: Value, func: F) -> Self
    where
        F: Fn(Value, &mut ToolContext) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value, ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        match (self.func)(arguments, ctx)? {
            Value::String(text) => Ok(ToolResult::text(text)),
            other => Ok(ToolResult::json(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wayfarer_core::state::State;

    #[tokio::test]
    async fn wraps_closure_and_writes_state() {
        let tool = FunctionTool::new(
            "remember_city",
            "Remember the user's home city",
            json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            |args, ctx| {
                let city = args["city"].as_str().unwrap_or_default().to_string();
                ctx.set("home_city", city.clone());
                Ok(Value::String(format!("Noted: {city}")))
            },
        );

        let mut ctx = ToolContext::new("memory_agent", "inv", State::new());
        let out = tool.execute(json!({"city": "Kochi"}), &mut ctx).await.unwrap();
        assert_eq!(out.output, "Noted: Kochi");
        assert!(out.data.is_none());
        assert_eq!(ctx.get("home_city").unwrap(), "Kochi");
    }

    #[tokio::test]
    async fn structured_return_and_errors() {
        let tool = FunctionTool::new("flaky", "fails on demand", json!({"type": "object"}), |args, _| {
            if args["fail"].as_bool().unwrap_or(false) {
                Err(ToolError::ExecutionFailed { tool_name: "flaky".into(), reason: "asked to".into() })
            } else {
                Ok(json!({"ok": true}))
            }
        });

        let mut ctx = ToolContext::new("a", "inv", State::new());
        let out = tool.execute(json!({}), &mut ctx).await.unwrap();
        assert_eq!(out.data.unwrap()["ok"], true);
        assert!(tool.execute(json!({"fail": true}), &mut ctx).await.is_err());
    }
}
