//! Agents for Wayfarer: the LLM invocation loop and the machinery around it.
//!
//! - [`LlmAgent`]: render instruction → call model → run tools → final reply
//! - [`InvocationContext`]: session, event log and user turn for one run
//! - [`Runner`]: load session, record the user message, run, return events
//! - [`AgentTool`]: delegate to an agent through the tool interface

pub mod agent;
pub mod agent_tool;
pub mod invocation;
pub mod llm_agent;
pub mod runner;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use agent::{Agent, AgentOutput};
pub use agent_tool::AgentTool;
pub use invocation::InvocationContext;
pub use llm_agent::LlmAgent;
pub use runner::{Runner, error_reply, final_response};
