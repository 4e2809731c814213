//! The LLM agent: the single-agent invocation primitive.
//!
//! One run follows a **Render → Call → Act → Observe** cycle:
//!
//! 1. **Render** the instruction template against session state
//! 2. **Call** the provider with instruction, history and the user turn
//! 3. **If tool calls**: execute them, feed results back, loop to step 2
//! 4. **If text**: validate against the output schema, write the output
//!    key, record the final event
//!
//! Tool failures never end the run; the model sees an `Error: ...` tool
//! message instead. Provider failures do.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use wayfarer_core::error::{Error, ToolError};
use wayfarer_core::event::{DomainEvent, Event, EventActions, EventKind};
use wayfarer_core::message::{Conversation, Message, MessageToolCall};
use wayfarer_core::provider::{Provider, ProviderRequest, Usage};
use wayfarer_core::schema::OutputSchema;
use wayfarer_core::state::{self, MissingKey, StateDelta};
use wayfarer_core::tool::{Tool, ToolCall, ToolContext, ToolRegistry};

use crate::agent::{Agent, AgentOutput};
use crate::invocation::InvocationContext;

const DEFAULT_HANDOFF_PROMPT: &str = "Continue with your task.";
const MAX_ITERATIONS_REPLY: &str =
    "I've reached the maximum number of tool call iterations. Please provide further guidance.";

/// An agent backed by a model: instruction template, tools, optional output
/// key and structured-output schema.
pub struct LlmAgent {
    name: String,
    description: String,
    provider: Arc<dyn Provider>,
    model: String,
    instruction: String,
    tools: ToolRegistry,
    output_key: Option<String>,
    output_schema: Option<OutputSchema>,
    schema_fallback: bool,
    reads: Option<Vec<String>>,
    temperature: f32,
    max_tokens: Option<u32>,
    include_history: bool,
    parallel_tool_calls: bool,
    max_tool_iterations: u32,
    handoff_prompt: String,
}

impl LlmAgent {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            provider,
            model: model.into(),
            instruction: instruction.into(),
            tools: ToolRegistry::new(),
            output_key: None,
            output_schema: None,
            schema_fallback: false,
            reads: None,
            temperature: 0.7,
            max_tokens: None,
            include_history: true,
            parallel_tool_calls: false,
            max_tool_iterations: 25,
            handoff_prompt: DEFAULT_HANDOFF_PROMPT.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the agent's tool set.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Write the final reply into this state key.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Require a JSON reply matching `schema`.
    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Accept replies that fail schema validation as plain text instead
    /// of failing the run.
    pub fn with_schema_fallback(mut self, enabled: bool) -> Self {
        self.schema_fallback = enabled;
        self
    }

    /// Declare read keys explicitly instead of inferring them from the
    /// instruction's required placeholders.
    pub fn with_reads<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.reads = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Replay earlier completed turns of the session (on by default).
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.include_history = enabled;
        self
    }

    /// Run the tool calls of one model step concurrently.
    pub fn with_parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = enabled;
        self
    }

    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max;
        self
    }

    /// User-turn text for agents that run after the request was consumed.
    pub fn with_handoff_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.handoff_prompt = prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn output_schema(&self) -> Option<&OutputSchema> {
        self.output_schema.as_ref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn build_conversation(&self, ctx: &mut InvocationContext) -> Result<Conversation, Error> {
        let instruction = state::render(&self.instruction, ctx.state()).map_err(|MissingKey(key)| {
            Error::MissingStateKey {
                agent: self.name.clone(),
                key,
            }
        })?;

        let mut conversation = Conversation::with_instruction(instruction);
        if self.include_history {
            for message in history(ctx.session().events.as_slice(), &ctx.invocation_id) {
                conversation.push(message);
            }
        }

        let turn = ctx.take_user_message().unwrap_or_else(|| self.handoff_prompt.clone());
        conversation.push(Message::user(turn));
        Ok(conversation)
    }

    fn request(&self, conversation: &Conversation) -> ProviderRequest {
        let mut request = ProviderRequest::new(&self.model, conversation.messages.clone());
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.tools = self.tools.definitions();
        request.response_schema = self.output_schema.clone();
        request
    }

    /// Execute one tool call against its own context. Never fails: errors
    /// become the `Error: ...` text the model will see.
    async fn execute_call(&self, call: &MessageToolCall, mut tool_ctx: ToolContext) -> ToolOutcome {
        let started = Instant::now();
        let result = match parse_arguments(&call.arguments) {
            Ok(arguments) => {
                let call = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments,
                };
                self.tools.execute(&call, &mut tool_ctx).await
            }
            Err(e) => Err(e),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (content, success, actions) = match result {
            Ok(r) if r.success => (r.output, true, tool_ctx.into_actions()),
            Ok(r) => (format!("Error: {}", r.output), false, tool_ctx.into_actions()),
            Err(e) => {
                warn!(agent = %self.name, tool = %call.name, error = %e, "Tool execution failed");
                (format!("Error: {e}"), false, EventActions::default())
            }
        };

        ToolOutcome {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content,
            success,
            actions,
            duration_ms,
        }
    }

    /// Run every tool call of one model step and record the responses.
    /// Returns whether any call escalated.
    async fn run_tool_calls(
        &self,
        calls: &[MessageToolCall],
        ctx: &mut InvocationContext,
        conversation: &mut Conversation,
    ) -> Result<bool, Error> {
        for call in calls {
            let event = Event::new(&ctx.invocation_id, &self.name, EventKind::ToolRequested, &call.arguments)
                .with_tool_name(&call.name);
            ctx.record(event).await?;
        }

        let mut escalated = false;
        if self.parallel_tool_calls {
            // All calls start from the same snapshot; deltas land in call order.
            let pending = calls.iter().map(|call| {
                let tool_ctx = ToolContext::new(&self.name, &ctx.invocation_id, ctx.state().clone());
                self.execute_call(call, tool_ctx)
            });
            let outcomes = join_all(pending).await;
            for outcome in outcomes {
                escalated |= self.record_outcome(outcome, ctx, conversation).await?;
            }
        } else {
            for call in calls {
                let tool_ctx = ToolContext::new(&self.name, &ctx.invocation_id, ctx.state().clone());
                let outcome = self.execute_call(call, tool_ctx).await;
                escalated |= self.record_outcome(outcome, ctx, conversation).await?;
            }
        }
        Ok(escalated)
    }

    async fn record_outcome(
        &self,
        outcome: ToolOutcome,
        ctx: &mut InvocationContext,
        conversation: &mut Conversation,
    ) -> Result<bool, Error> {
        ctx.publish(DomainEvent::ToolExecuted {
            tool_name: outcome.tool_name.clone(),
            success: outcome.success,
            duration_ms: outcome.duration_ms,
            timestamp: chrono::Utc::now(),
        });

        let escalate = outcome.actions.escalate;
        let event = Event::new(&ctx.invocation_id, &self.name, EventKind::ToolResponse, &outcome.content)
            .with_tool_name(&outcome.tool_name)
            .with_actions(outcome.actions);
        ctx.record(event).await?;

        conversation.push(Message::tool_result(outcome.call_id, outcome.content));
        Ok(escalate)
    }

    async fn finish(
        &self,
        text: String,
        ctx: &mut InvocationContext,
        escalated: bool,
        usage: Usage,
    ) -> Result<AgentOutput, Error> {
        let structured = match &self.output_schema {
            Some(schema) => match schema.parse(&text) {
                Ok(value) => Some(value),
                Err(reason) if self.schema_fallback => {
                    debug!(agent = %self.name, %reason, "Reply does not match schema, keeping plain text");
                    None
                }
                Err(reason) => {
                    return Err(Error::OutputSchema {
                        agent: self.name.clone(),
                        reason,
                    });
                }
            },
            None => None,
        };

        let mut delta = StateDelta::new();
        if let Some(key) = &self.output_key {
            let value = structured.clone().unwrap_or_else(|| Value::String(text.clone()));
            delta.set(key.clone(), value);
        }

        let mut event = Event::new(&ctx.invocation_id, &self.name, EventKind::FinalResponse, &text)
            .with_actions(EventActions {
                state_delta: delta,
                escalate: false,
            });
        if let Some(value) = &structured {
            event = event.with_structured(value.clone());
        }
        ctx.record(event).await?;

        ctx.publish(DomainEvent::ResponseGenerated {
            agent: self.name.clone(),
            model: self.model.clone(),
            tokens_used: usage.total_tokens,
            timestamp: chrono::Utc::now(),
        });

        Ok(AgentOutput {
            text,
            structured,
            escalated,
            usage,
        })
    }
}

struct ToolOutcome {
    call_id: String,
    tool_name: String,
    content: String,
    success: bool,
    actions: EventActions,
    duration_ms: u64,
}

fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}

/// Completed turns from earlier invocations: each user message followed by
/// the last final response of that invocation. Turns without a final
/// response (failed runs) are skipped.
fn history(events: &[wayfarer_core::event::Event], current_invocation: &str) -> Vec<Message> {
    let mut turns: Vec<(Option<&str>, Option<&str>)> = Vec::new();
    let mut last_invocation: Option<&str> = None;

    for event in events.iter().filter(|e| e.invocation_id != current_invocation) {
        if last_invocation != Some(event.invocation_id.as_str()) {
            turns.push((None, None));
            last_invocation = Some(event.invocation_id.as_str());
        }
        let Some(turn) = turns.last_mut() else { continue };
        match event.kind {
            EventKind::UserMessage if turn.0.is_none() => turn.0 = Some(event.content.as_str()),
            EventKind::FinalResponse => turn.1 = Some(event.content.as_str()),
            _ => {}
        }
    }

    let mut messages = Vec::new();
    for (user, reply) in turns {
        let Some(reply) = reply else { continue };
        if let Some(user) = user {
            messages.push(Message::user(user));
        }
        messages.push(Message::assistant(reply));
    }
    messages
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn reads(&self) -> Vec<String> {
        if let Some(keys) = &self.reads {
            return keys.clone();
        }
        let mut keys: Vec<String> = Vec::new();
        for placeholder in state::placeholders(&self.instruction) {
            if !placeholder.optional && !keys.contains(&placeholder.key) {
                keys.push(placeholder.key);
            }
        }
        keys
    }

    fn writes(&self) -> Vec<String> {
        self.output_key.iter().cloned().collect()
    }

    async fn run(&self, ctx: &mut InvocationContext) -> wayfarer_core::Result<AgentOutput> {
        info!(agent = %self.name, invocation = %ctx.invocation_id, model = %self.model, "Running agent");
        ctx.publish(DomainEvent::AgentStarted {
            agent: self.name.clone(),
            invocation_id: ctx.invocation_id.clone(),
            timestamp: chrono::Utc::now(),
        });

        let mut conversation = self.build_conversation(ctx)?;
        let mut usage = Usage::default();
        let mut escalated = false;

        for iteration in 1..=self.max_tool_iterations {
            debug!(agent = %self.name, iteration, messages = conversation.messages.len(), "Agent loop iteration");

            let response = match self.provider.complete(self.request(&conversation)).await {
                Ok(response) => response,
                Err(e) => {
                    ctx.publish(DomainEvent::ErrorOccurred {
                        context: format!("agent:{}", self.name),
                        error_message: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    return Err(e.into());
                }
            };
            if let Some(u) = &response.usage {
                usage.add(u);
            }

            if !response.message.has_tool_calls() {
                return self.finish(response.message.content, ctx, escalated, usage).await;
            }

            let calls = response.message.tool_calls.clone();
            debug!(agent = %self.name, tool_count = calls.len(), "Executing tool calls");
            conversation.push(response.message);
            escalated |= self.run_tool_calls(&calls, ctx, &mut conversation).await?;
        }

        warn!(agent = %self.name, max = self.max_tool_iterations, "Max tool iterations reached, forcing text response");
        self.finish(MAX_ITERATIONS_REPLY.into(), ctx, escalated, usage).await
    }
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("provider", &self.provider.name())
            .field("tools", &self.tools.names())
            .field("output_key", &self.output_key)
            .finish()
    }
}
