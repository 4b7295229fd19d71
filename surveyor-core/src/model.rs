//! Model invocation seam.
//!
//! The pipeline talks to its language-model collaborators only through
//! [`ModelInvoker`]. Two roles exist: the scientist, which plans and
//! interprets the research, and the respondent, which answers interviews.

use crate::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Scientist,
    Respondent,
}

impl ModelRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scientist => "scientist",
            Self::Respondent => "respondent",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub role: ModelRole,
    pub prompt: String,
    pub max_tokens: usize,
}

impl ModelRequest {
    pub fn scientist(prompt: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            role: ModelRole::Scientist,
            prompt: prompt.into(),
            max_tokens,
        }
    }

    pub fn respondent(prompt: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            role: ModelRole::Respondent,
            prompt: prompt.into(),
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// An opaque model capability.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run one completion for `request.role`.
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Token counter backed by tiktoken.
pub struct TokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter").finish_non_exhaustive()
    }
}

impl TokenCounter {
    /// Tokenizer for `model`, falling back to cl100k_base. `None` when no
    /// encoding can be loaded.
    pub fn for_model(model: &str) -> Option<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .ok()?;
        Some(Self { bpe })
    }

    /// Count the number of tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Rough estimate used when no tokenizer is available.
pub fn approximate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Exact count when a counter is given, otherwise [`approximate_tokens`].
pub fn estimate_tokens(counter: Option<&TokenCounter>, text: &str) -> usize {
    match counter {
        Some(counter) => counter.count(text),
        None => approximate_tokens(text),
    }
}

type RespondentFn = dyn Fn(&ModelRequest) -> String + Send + Sync;

/// Scripted invoker for tests and offline runs.
///
/// Scientist calls pop queued responses in order; respondent calls go
/// through a closure. Any prompt containing a registered failure pattern
/// fails with [`ModelError::Request`].
pub struct MockModelInvoker {
    model: String,
    queued: Mutex<HashMap<ModelRole, VecDeque<String>>>,
    respondent: Option<Arc<RespondentFn>>,
    fail_patterns: Mutex<Vec<String>>,
    calls: Mutex<Vec<ModelRequest>>,
}

impl Default for MockModelInvoker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockModelInvoker {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            queued: Mutex::new(HashMap::new()),
            respondent: None,
            fail_patterns: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every respondent call with `f(request)`.
    pub fn with_respondent<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModelRequest) -> String + Send + Sync + 'static,
    {
        self.respondent = Some(Arc::new(f));
        self
    }

    /// Queue a response for the next call in `role`.
    pub fn queue(&self, role: ModelRole, text: impl Into<String>) {
        lock(&self.queued)
            .entry(role)
            .or_default()
            .push_back(text.into());
    }

    pub fn queue_scientist(&self, text: impl Into<String>) {
        self.queue(ModelRole::Scientist, text);
    }

    /// Fail every call whose prompt contains `pattern`.
    pub fn fail_when_prompt_contains(&self, pattern: impl Into<String>) {
        lock(&self.fail_patterns).push(pattern.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_patterns).clear();
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<ModelRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, role: ModelRole) -> usize {
        lock(&self.calls).iter().filter(|c| c.role == role).count()
    }
}

#[async_trait]
impl ModelInvoker for MockModelInvoker {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        lock(&self.calls).push(request.clone());

        let failing = lock(&self.fail_patterns)
            .iter()
            .any(|p| request.prompt.contains(p.as_str()));
        if failing {
            return Err(ModelError::Request {
                role: request.role.to_string(),
                message: "scripted failure".into(),
            });
        }

        let queued = lock(&self.queued)
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front);
        let text = match (queued, request.role, &self.respondent) {
            (Some(text), _, _) => text,
            (None, ModelRole::Respondent, Some(respond)) => respond(&request),
            (None, _, _) => "{}".to_string(),
        };

        Ok(ModelResponse {
            input_tokens: approximate_tokens(&request.prompt),
            output_tokens: approximate_tokens(&text),
            text,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
