//! OpenAI Chat Completions provider

use std::sync::Arc;

use async_trait::async_trait;
use pai_core::{
    error::{AgentError, Result},
    message::single_turn,
    provider::{GenerationOptions, LlmProvider},
    registry::{ProviderArgs, ProviderFactory},
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::http::{client, merge_extra, require_api_key, send_json, trim_base};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const BASE_URL: &str = "https://api.openai.com/v1";
pub const CLASS_PATH: &str = "pai_runtime::openai::OpenAiProvider";

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: client()?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.into(),
        })
    }

    pub fn from_args(args: ProviderArgs) -> Result<Self> {
        let api_key = require_api_key("openai", args.api_key)?;
        let mut provider = Self::new(api_key, args.model.unwrap_or_else(|| DEFAULT_MODEL.into()))?;
        if let Some(base_url) = args.base_url {
            provider.base_url = trim_base(&base_url);
        }
        Ok(provider)
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|args: ProviderArgs| Ok(Box::new(Self::from_args(args)?) as Box<dyn LlmProvider>))
    }

    fn request_body(&self, prompt: &str, options: &GenerationOptions) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("model".into(), json!(options.model_or(&self.model)));
        body.insert("messages".into(), json!(single_turn(options.system(), prompt)));
        if let Some(t) = options.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(n) = options.max_tokens {
            body.insert("max_tokens".into(), json!(n));
        }
        if let Some(p) = options.top_p {
            body.insert("top_p".into(), json!(p));
        }
        merge_extra(&mut body, &options.extra);
        body
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

fn extract_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AgentError::Provider("OpenAI returned no message content".into()))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let body = self.request_body(prompt, options);
        tracing::debug!(model = %body["model"], "OpenAI chat completion");
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);
        extract_text(send_json("OpenAI", request).await?)
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key);
        let list: ModelList = send_json("OpenAI", request).await?;
        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("sk-test", DEFAULT_MODEL).unwrap()
    }

    #[test]
    fn test_request_body() {
        let options = GenerationOptions::from_params(&["temperature=0.5", "seed=1", "model=gpt-4o"]).unwrap();
        let body = provider().request_body("Hello", &options);
        assert_eq!(body["model"], json!("gpt-4o"));
        assert_eq!(body["temperature"], json!(0.5));
        assert_eq!(body["seed"], json!(1));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "Hello"}));
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_extract_text() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hi there");

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(extract_text(empty).is_err());
    }

    #[tokio::test]
    async fn test_empty_prompt_short_circuits() {
        let mut provider = provider();
        // unroutable; a network attempt would fail with a Provider error instead
        provider.base_url = "http://127.0.0.1:9".into();
        let err = provider.generate("  ", &GenerationOptions::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyPrompt));
    }

    #[test]
    fn test_from_args() {
        let provider = OpenAiProvider::from_args(
            ProviderArgs::default()
                .with_api_key("sk-x")
                .with_model("gpt-4o"),
        )
        .unwrap();
        assert_eq!(provider.model(), "gpt-4o");
        assert!(provider.supports_model_listing());
    }
}
