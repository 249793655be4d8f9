//! Anthropic Messages API provider

use std::sync::Arc;

use async_trait::async_trait;
use pai_core::{
    error::{AgentError, Result},
    message::Message,
    provider::{GenerationOptions, LlmProvider},
    registry::{ProviderArgs, ProviderFactory},
};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::http::{client, merge_extra, require_api_key, send_json, trim_base};

pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
pub const BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const CLASS_PATH: &str = "pai_runtime::anthropic::AnthropicProvider";

/// `max_tokens` is mandatory for this API
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// Anthropic provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: client()?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.into(),
        })
    }

    pub fn from_args(args: ProviderArgs) -> Result<Self> {
        let api_key = require_api_key("anthropic", args.api_key)?;
        let mut provider = Self::new(api_key, args.model.unwrap_or_else(|| DEFAULT_MODEL.into()))?;
        if let Some(base_url) = args.base_url {
            provider.base_url = trim_base(&base_url);
        }
        Ok(provider)
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|args: ProviderArgs| Ok(Box::new(Self::from_args(args)?) as Box<dyn LlmProvider>))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn request_body(&self, prompt: &str, options: &GenerationOptions) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("model".into(), json!(options.model_or(&self.model)));
        body.insert("messages".into(), json!([Message::user(prompt)]));
        body.insert(
            "max_tokens".into(),
            json!(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        let system = options.system();
        if !system.trim().is_empty() {
            body.insert("system".into(), json!(system));
        }
        if let Some(t) = options.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(p) = options.top_p {
            body.insert("top_p".into(), json!(p));
        }
        merge_extra(&mut body, &options.extra);
        body
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Concatenate the text blocks of a response
fn extract_text(response: MessagesResponse) -> Result<String> {
    let text: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if text.is_empty() {
        return Err(AgentError::Provider(
            "Anthropic returned no text in the response content".into(),
        ));
    }
    Ok(text.join(""))
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let body = self.request_body(prompt, options);
        tracing::debug!(model = %body["model"], "Anthropic messages request");
        let request = self
            .authorized(self.client.post(format!("{}/messages", self.base_url)))
            .json(&body);
        extract_text(send_json("Anthropic", request).await?)
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let request = self.authorized(self.client.get(format!("{}/models", self.base_url)));
        let list: ModelList = send_json("Anthropic", request).await?;
        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let provider = AnthropicProvider::new("key", DEFAULT_MODEL).unwrap();
        let body = provider.request_body("Hi", &GenerationOptions::default());
        assert_eq!(body["max_tokens"], json!(300));
        assert_eq!(body["messages"], json!([{"role": "user", "content": "Hi"}]));
        assert!(body["system"].as_str().unwrap().starts_with("Role:"));

        let options = GenerationOptions::from_params(&["max_tokens=1024", "system=Be terse"]).unwrap();
        let body = provider.request_body("Hi", &options);
        assert_eq!(body["max_tokens"], json!(1024));
        assert_eq!(body["system"], json!("Be terse"));
    }

    #[test]
    fn test_extract_text() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "world"}
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hello, world");

        let empty: MessagesResponse = serde_json::from_value(json!({"content": []})).unwrap();
        assert!(extract_text(empty).is_err());
    }
}
