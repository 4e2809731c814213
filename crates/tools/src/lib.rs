//! Built-in tool implementations for Wayfarer.
//!
//! Tools give agents the ability to look things up mid-turn: the weather,
//! the web, the time in a city. `exit_loop` lets a refinement-loop agent
//! end the loop, and [`FunctionTool`] wraps a plain closure as a tool.

pub mod current_time;
pub mod exit_loop;
pub mod function_tool;
pub mod greetings;
pub mod weather_lookup;
pub mod web_search;

use std::sync::Arc;
use wayfarer_core::tool::{Tool, ToolRegistry};

pub use current_time::CurrentTimeTool;
pub use exit_loop::ExitLoopTool;
pub use function_tool::FunctionTool;
pub use greetings::{SayGoodbyeTool, SayHelloTool};
pub use weather_lookup::WeatherLookupTool;
pub use web_search::WebSearchTool;

/// Settings the networked tools need.
#[derive(Debug, Clone, Default)]
pub struct ToolSettings {
    /// Tavily key for `web_search`
    pub tavily_api_key: Option<String>,

    /// HTTP timeout in seconds (0 keeps the client default)
    pub request_timeout_secs: u64,
}

/// Look up a built-in tool by name.
pub fn builtin(name: &str, settings: &ToolSettings) -> Option<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match name {
        "weather_lookup" => Arc::new(WeatherLookupTool::new(settings.request_timeout_secs)),
        "web_search" => Arc::new(WebSearchTool::new(
            settings.tavily_api_key.clone(),
            settings.request_timeout_secs,
        )),
        "current_time" => Arc::new(CurrentTimeTool),
        "say_hello" => Arc::new(SayHelloTool),
        "say_goodbye" => Arc::new(SayGoodbyeTool),
        "exit_loop" => Arc::new(ExitLoopTool::default()),
        _ => return None,
    };
    Some(tool)
}

/// Names accepted by [`builtin`].
pub const BUILTIN_NAMES: &[&str] = &[
    "current_time",
    "exit_loop",
    "say_goodbye",
    "say_hello",
    "weather_lookup",
    "web_search",
];

/// Create a tool registry with the general-purpose built-in tools.
///
/// `exit_loop` is left out; only refinement-loop agents should see it.
pub fn default_registry(settings: &ToolSettings) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in BUILTIN_NAMES.iter().filter(|n| **n != "exit_loop") {
        if let Some(tool) = builtin(name, settings) {
            registry.register(tool);
        }
    }
    registry
}

/// Build a registry from tool names, reporting the first unknown one.
pub fn registry_from_names<S: AsRef<str>>(names: &[S], settings: &ToolSettings) -> Result<ToolRegistry, String> {
    let mut registry = ToolRegistry::new();
    for name in names {
        let name = name.as_ref();
        let tool = builtin(name, settings).ok_or_else(|| name.to_string())?;
        registry.register(tool);
    }
    Ok(registry)
}
