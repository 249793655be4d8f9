//! Ollama LLM Provider
//!
//! Local inference through `ollama-rs`. No API key; the server location
//! comes from `OLLAMA_HOST` / `OLLAMA_PORT`.

use std::sync::Arc;

use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, request::ChatMessageRequest},
    models::ModelOptions,
};
use pai_core::{
    error::{AgentError, Result},
    message::{Message, Role, single_turn},
    provider::{GenerationOptions, LlmProvider},
    registry::{ProviderArgs, ProviderFactory},
};

pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_HOST: &str = "http://localhost";
pub const DEFAULT_PORT: u16 = 11434;
pub const CLASS_PATH: &str = "pai_runtime::ollama::OllamaProvider";

/// Ollama provider configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("OLLAMA_HOST").ok(),
            std::env::var("OLLAMA_PORT").ok(),
        )
    }

    /// A `base_url` such as `http://gpu-box:11434` also carries the port
    pub fn from_values(host: Option<String>, port: Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            let host = host.trim_end_matches('/');
            match host.rsplit_once(':') {
                Some((base, p)) if base.contains("://") && p.parse::<u16>().is_ok() => {
                    config.host = base.to_string();
                    config.port = p.parse().unwrap_or(DEFAULT_PORT);
                }
                _ => config.host = host.to_string(),
            }
        }
        if let Some(port) = port.and_then(|p| p.trim().parse().ok()) {
            config.port = port;
        }
        config
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
    model: String,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig, model: impl Into<String>) -> Self {
        Self {
            client: Ollama::new(config.host.clone(), config.port),
            config,
            model: model.into(),
        }
    }

    pub fn from_args(args: ProviderArgs) -> Self {
        let config = args.base_url.map_or_else(OllamaConfig::from_env, |url| {
            OllamaConfig::from_values(Some(url), None)
        });
        Self::new(config, args.model.unwrap_or_else(|| DEFAULT_MODEL.into()))
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|args: ProviderArgs| Ok(Box::new(Self::from_args(args)) as Box<dyn LlmProvider>))
    }

    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn convert_messages(messages: Vec<Message>) -> Vec<ChatMessage> {
        messages
            .into_iter()
            .map(|m| match m.role {
                Role::System => ChatMessage::system(m.content),
                Role::User => ChatMessage::user(m.content),
                Role::Assistant => ChatMessage::assistant(m.content),
            })
            .collect()
    }

    fn build_options(options: &GenerationOptions) -> ModelOptions {
        let mut built = ModelOptions::default();
        if let Some(t) = options.temperature {
            built = built.temperature(t);
        }
        if let Some(p) = options.top_p {
            built = built.top_p(p);
        }
        if let Some(n) = options.max_tokens {
            built = built.num_predict(i32::try_from(n).unwrap_or(i32::MAX));
        }
        if !options.extra.is_empty() {
            tracing::debug!(
                keys = ?options.extra.keys().collect::<Vec<_>>(),
                "Ollama ignores passthrough parameters"
            );
        }
        built
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let model = options.model_or(&self.model).to_string();
        tracing::debug!(%model, host = %self.config.host, port = self.config.port, "Ollama chat");
        let request = ChatMessageRequest::new(
            model,
            Self::convert_messages(single_turn(options.system(), prompt)),
        )
        .options(Self::build_options(options));

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AgentError::Provider(format!("Ollama request failed: {e}")))?;
        Ok(response.message.content)
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::Provider(format!("Ollama is not reachable: {e}")))?;
        let mut names: Vec<String> = models.into_iter().map(|m| m.name).collect();
        names.sort();
        Ok(names)
    }
}
