//! Hugging Face Inference API provider (text generation)

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

pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.1-8B-Instruct";
pub const BASE_URL: &str = "https://api-inference.huggingface.co/models";
pub const CLASS_PATH: &str = "pai_runtime::huggingface::HuggingFaceProvider";

/// Hugging Face provider
pub struct HuggingFaceProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl HuggingFaceProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: client()?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.into(),
        })
    }

    pub fn from_args(args: ProviderArgs) -> Result<Self> {
        let api_key = require_api_key("huggingface", args.api_key)?;
        let mut provider = Self::new(api_key, args.model.unwrap_or_else(|| DEFAULT_MODEL.into()))?;
        if let Some(base_url) = args.base_url {
            provider.base_url = trim_base(&base_url);
        }
        Ok(provider)
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|args: ProviderArgs| Ok(Box::new(Self::from_args(args)?) as Box<dyn LlmProvider>))
    }

    /// Text generation takes a single input string; the system prompt leads it
    fn request_body(prompt: &str, options: &GenerationOptions) -> Value {
        let system = options.system();
        let inputs = if system.trim().is_empty() {
            prompt.to_string()
        } else {
            format!("{system}\n\n{prompt}")
        };

        let mut parameters = Map::new();
        parameters.insert("return_full_text".into(), json!(false));
        if let Some(n) = options.max_tokens {
            parameters.insert("max_new_tokens".into(), json!(n));
        }
        if let Some(t) = options.temperature {
            parameters.insert("temperature".into(), json!(t));
        }
        if let Some(p) = options.top_p {
            parameters.insert("top_p".into(), json!(p));
        }
        merge_extra(&mut parameters, &options.extra);

        json!({"inputs": inputs, "parameters": parameters})
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerationResponse {
    Many(Vec<Generated>),
    One(Generated),
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}

fn extract_text(response: GenerationResponse) -> Result<String> {
    match response {
        GenerationResponse::One(g) => Ok(g.generated_text),
        GenerationResponse::Many(list) => list
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| AgentError::Provider("Hugging Face returned no generations".into())),
    }
}

#[async_trait]
impl LlmProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let model = options.model_or(&self.model);
        tracing::debug!(model, "Hugging Face text generation");
        let request = self
            .client
            .post(format!("{}/{model}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(prompt, options));
        let text = extract_text(send_json("Hugging Face", request).await?)?;
        Ok(text.trim().to_string())
    }
}
