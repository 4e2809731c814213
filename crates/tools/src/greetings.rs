//! Greeting tools used by the greeter agents.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;
use wayfarer_core::error::ToolError;
use wayfarer_core::tool::{Tool, ToolContext, ToolResult};

fn name_schema(purpose: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": format!("The name of the person to {purpose}") }
        }
    })
}

fn name_arg(arguments: &Value) -> Option<&str> {
    arguments["name"].as_str().map(str::trim).filter(|n| !n.is_empty())
}

pub struct SayHelloTool;

#[async_trait]
impl Tool for SayHelloTool {
    fn name(&self) -> &str {
        "say_hello"
    }

    fn description(&self) -> &str {
        "Returns a greeting message, optionally addressed to a name."
    }

    fn parameters_schema(&self) -> Value {
        name_schema("greet")
    }

    async fn execute(&self, arguments: Value, _ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        let name = name_arg(&arguments);
        info!(?name, "say_hello called");
        Ok(ToolResult::text(hello(name)))
    }
}

pub struct SayGoodbyeTool;

#[async_trait]
impl Tool for SayGoodbyeTool {
    fn name(&self) -> &str {
        "say_goodbye"
    }

    fn description(&self) -> &str {
        "Returns a goodbye message, optionally addressed to a name."
    }

    fn parameters_schema(&self) -> Value {
        name_schema("say goodbye to")
    }

    async fn execute(&self, arguments: Value, _ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        let name = name_arg(&arguments);
        info!(?name, "say_goodbye called");
        Ok(ToolResult::text(goodbye(name)))
    }
}

pub fn hello(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("Hello, {name}! Nice to meet you!"),
        None => "Hello World! Nice to meet you!".into(),
    }
}

pub fn goodbye(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("Goodbye, {name}! It was nice meeting you!"),
        None => "Goodbye cruel world! It was nice meeting you!".into(),
    }
}
