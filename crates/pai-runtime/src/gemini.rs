//! Google Gemini generateContent provider

use std::sync::Arc;

use async_trait::async_trait;
use pai_core::{
    error::{AgentError, Result},
    provider::{GenerationOptions, LlmProvider},
    registry::{ProviderArgs, ProviderFactory},
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::http::{client, merge_extra, require_api_key, send_json, trim_base};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const CLASS_PATH: &str = "pai_runtime::gemini::GeminiProvider";

/// Gemini provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: client()?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.into(),
        })
    }

    pub fn from_args(args: ProviderArgs) -> Result<Self> {
        let api_key = require_api_key("gemini", args.api_key)?;
        let mut provider = Self::new(api_key, args.model.unwrap_or_else(|| DEFAULT_MODEL.into()))?;
        if let Some(base_url) = args.base_url {
            provider.base_url = trim_base(&base_url);
        }
        Ok(provider)
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|args: ProviderArgs| Ok(Box::new(Self::from_args(args)?) as Box<dyn LlmProvider>))
    }

    fn request_body(prompt: &str, options: &GenerationOptions) -> Map<String, Value> {
        let mut config = Map::new();
        if let Some(t) = options.temperature {
            config.insert("temperature".into(), json!(t));
        }
        if let Some(n) = options.max_tokens {
            config.insert("maxOutputTokens".into(), json!(n));
        }
        if let Some(p) = options.top_p {
            config.insert("topP".into(), json!(p));
        }
        merge_extra(&mut config, &options.extra);

        let mut body = Map::new();
        body.insert(
            "contents".into(),
            json!([{"role": "user", "parts": [{"text": prompt}]}]),
        );
        let system = options.system();
        if !system.trim().is_empty() {
            body.insert("systemInstruction".into(), json!({"parts": [{"text": system}]}));
        }
        if !config.is_empty() {
            body.insert("generationConfig".into(), Value::Object(config));
        }
        body
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

fn extract_text(response: GenerateContentResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(AgentError::Provider(
            "Gemini returned no text in the response candidates".into(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let model = options.model_or(&self.model);
        tracing::debug!(model, "Gemini generateContent");
        let request = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(prompt, options));
        extract_text(send_json("Gemini", request).await?)
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .query(&[("key", self.api_key.as_str()), ("pageSize", "1000")]);
        let list: ModelList = send_json("Gemini", request).await?;
        let mut names: Vec<String> = list
            .models
            .into_iter()
            .map(|m| m.name.strip_prefix("models/").map_or(m.name.clone(), str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let options = GenerationOptions::from_params(&["temperature=0", "max_tokens=64", "candidateCount=1"]).unwrap();
        let body = GeminiProvider::request_body("Hello", &options);
        assert_eq!(body["contents"][0]["parts"][0]["text"], json!("Hello"));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(64));
        assert_eq!(body["generationConfig"]["candidateCount"], json!(1));
        assert!(body["systemInstruction"]["parts"][0]["text"].is_string());

        let bare = GeminiProvider::request_body("Hello", &GenerationOptions::default());
        assert!(bare.get("generationConfig").is_none());
    }

    #[test]
    fn test_extract_text() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hi "}, {"text": "there"}]}}]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hi there");

        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert!(extract_text(blocked).is_err());
    }
}
