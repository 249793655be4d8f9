//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM vendors (OpenAI, Anthropic, Gemini,
//! Hugging Face, Ollama) so the agent loop works against any backend.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pai_core::provider::{GenerationOptions, LlmProvider};
//!
//! let provider = OpenAiProvider::from_args(args)?;
//! let text = provider.generate("Hello", &GenerationOptions::default()).await?;
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

/// System prompt sent with every request unless overridden with `system`.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Role: You are a helpful AI assistant with access to tools and resources.
Guidelines:
- Use tools and resources available to you when they are needed to answer.
- If you use a resource or tool, you MUST include the JSON request block in your response.
- Always provide accurate and concise information.
- Be respectful and professional in your responses.
- If you don't know the answer, it's okay to say so.";

/// Per-call generation parameters.
///
/// Known keys map onto typed fields; anything else lands in `extra` and is
/// forwarded to the vendor request body untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Per-call model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-p nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// System prompt override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Vendor-specific passthrough parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl GenerationOptions {
    /// Build options from `key=value` strings as given on the command line.
    pub fn from_params<S: AsRef<str>>(params: &[S]) -> Result<Self> {
        let mut options = Self::default();
        for raw in params {
            let (key, value) = parse_param(raw.as_ref())?;
            options.set(&key, value)?;
        }
        Ok(options)
    }

    /// Set one parameter, routing known keys to their typed field.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        match key {
            "model" => self.model = Some(value_as_string(value)),
            "system" | "system_prompt" => self.system_prompt = Some(value_as_string(value)),
            #[allow(clippy::cast_possible_truncation)]
            "temperature" => self.temperature = Some(expect_f64(key, &value)? as f32),
            #[allow(clippy::cast_possible_truncation)]
            "top_p" => self.top_p = Some(expect_f64(key, &value)? as f32),
            "max_tokens" => {
                let n = value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        AgentError::InvalidArgument(format!(
                            "max_tokens must be a positive integer, got {value}"
                        ))
                    })?;
                self.max_tokens = Some(n);
            }
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// The system prompt to send: the override if present, else the default.
    pub fn system(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// The model to use: the per-call override if present, else `fallback`.
    pub fn model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(fallback)
    }
}

/// Split `key=value`. The value is read as JSON when it parses, else kept as text.
pub fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw.split_once('=').ok_or_else(|| {
        AgentError::InvalidArgument(format!("expected key=value, got '{raw}'"))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(AgentError::InvalidArgument(format!(
            "parameter name missing in '{raw}'"
        )));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn value_as_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn expect_f64(key: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        AgentError::InvalidArgument(format!("{key} must be a number, got {value}"))
    })
}

/// Reject blank prompts before any network traffic happens.
pub fn ensure_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        tracing::error!("Prompt cannot be empty");
        return Err(AgentError::EmptyPrompt);
    }
    Ok(())
}

/// Strategy trait for LLM providers
///
/// Implement `complete` to add a new backend. Callers go through
/// `generate`, which guards against blank prompts first.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Canonical provider name (e.g. "openai")
    fn name(&self) -> &str;

    /// Model this adapter was constructed with
    fn model(&self) -> &str;

    /// Vendor call. Never invoked with a blank prompt.
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Generate a completion for a single prompt
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        ensure_prompt(prompt)?;
        self.complete(prompt, options).await
    }

    /// Whether `list_models` is implemented
    fn supports_model_listing(&self) -> bool {
        false
    }

    /// List available model identifiers, sorted
    async fn list_models(&self) -> Result<Vec<String>> {
        Err(AgentError::Unsupported(format!(
            "provider '{}' does not support listing models",
            self.name()
        )))
    }
}
