//! Scripted providers for offline tests of agents and workflows.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use serde_json::Value;
use wayfarer_core::error::ProviderError;
use wayfarer_core::message::{Message, MessageToolCall};
use wayfarer_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// A provider that replays a queue of canned responses.
///
/// Each `complete` call pops the next response. Once the queue is empty the
/// fallback (if any) is returned forever; without one the call fails with
/// an API error. Every request is kept for inspection.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    fallback: Option<Result<ProviderResponse, ProviderError>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Plain text replies, in order.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| text_response(t)).collect())
    }

    /// The same text reply for every call.
    pub fn repeating(text: &str) -> Self {
        Self::new(Vec::new()).with_fallback(text_response(text))
    }

    /// Every call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(Err(error)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Response returned once the script runs out.
    pub fn with_fallback(mut self, response: ProviderResponse) -> Self {
        self.fallback = Some(Ok(response));
        self
    }

    /// Queue a failure after the responses already scripted.
    pub fn then_fail(self, error: ProviderError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = lock(&self.requests);
            requests.push(request);
            requests.len()
        };

        match lock(&self.script).pop_front() {
            Some(next) => next,
            None => self.fallback.clone().unwrap_or_else(|| {
                Err(ProviderError::ApiError {
                    status_code: 500,
                    message: format!("script exhausted at call #{call}"),
                })
            }),
        }
    }
}

/// A final text reply.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "scripted-model".into(),
    }
}

/// A reply requesting the given `(tool name, arguments)` calls.
pub fn tool_call_response(calls: Vec<(&str, Value)>) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, arguments))| MessageToolCall {
            id: format!("call_{}_{i}", uuid::Uuid::new_v4().simple()),
            name: name.to_string(),
            arguments: arguments.to_string(),
        })
        .collect();
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        }),
        model: "scripted-model".into(),
    }
}
