//! LLM as a capability, not a dependency: given a prompt and a schema
//! hint, receive text. JSON repair and hallucination detection live in
//! the extraction pipeline, never here, so mock adapters stay trivial.

mod breaker;
mod budget;
mod http;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use budget::TokenBudget;
pub use http::HttpLlm;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{EngramError, Result};

/// Which model tier a call targets. Small handles extraction; large
/// handles probe synthesis, NL query planning, and inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmTier {
    Small,
    Large,
}

impl LlmTier {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmTier::Small => "llm_small",
            LlmTier::Large => "llm_large",
        }
    }
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Free-text hint describing the JSON shape expected back.
    pub schema_hint: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            schema_hint: None,
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_schema_hint(mut self, hint: impl Into<String>) -> Self {
        self.schema_hint = Some(hint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rough token estimate for budget accounting (~4 chars per token).
    pub fn estimated_tokens(&self) -> u64 {
        (self.prompt.len() as u64 / 4) + self.max_tokens as u64
    }
}

/// The capability contract. Implementations are provider adapters.
#[async_trait]
pub trait LlmCapability: Send + Sync {
    /// Adapter name (used in tracing and breaker labels).
    fn name(&self) -> &str;

    /// Complete the prompt. Timeouts and provider failures surface as
    /// [`EngramError::TransientExternal`].
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Scripted adapter for tests: pops canned responses in order.
/// An exhausted script times out like a dead provider.
pub struct ScriptedLlm {
    name: String,
    responses: Mutex<VecDeque<Result<String>>>,
}

impl ScriptedLlm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
    }

    pub fn push_failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(EngramError::TransientExternal {
                dependency: "scripted".to_string(),
                reason,
            }));
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmCapability for ScriptedLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String> {
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Err(EngramError::TransientExternal {
                dependency: self.name.clone(),
                reason: "script exhausted".to_string(),
            }),
        }
    }
}
