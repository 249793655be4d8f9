//! Shared plumbing for the REST adapters

use std::collections::BTreeMap;
use std::time::Duration;

use pai_core::config::{api_key_env_vars, api_key_from_env};
use pai_core::error::{AgentError, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Upper bound for one vendor call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))
}

/// The explicit key, else the provider's environment variable
pub(crate) fn require_api_key(provider: &str, explicit: Option<String>) -> Result<String> {
    explicit
        .filter(|k| !k.trim().is_empty())
        .or_else(|| api_key_from_env(provider))
        .ok_or_else(|| {
            AgentError::Config(format!(
                "no API key for '{provider}'; pass --api-key or set {}",
                api_key_env_vars(provider).join(" / ")
            ))
        })
}

/// Send a request and decode a JSON body, mapping non-2xx to `Provider` errors
pub(crate) async fn send_json<T: DeserializeOwned>(vendor: &str, request: RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| AgentError::Provider(format!("{vendor} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| format!("failed to read {vendor} error body"));
        return Err(map_http_error(vendor, status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| AgentError::Provider(format!("failed to parse {vendor} response: {e}")))
}

/// Pull the vendor's message out of an error body when there is one
pub(crate) fn map_http_error(vendor: &str, status: StatusCode, body: &str) -> AgentError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| match v.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(err) => err.get("message").and_then(Value::as_str).map(str::to_string),
            None => v.get("message").and_then(Value::as_str).map(str::to_string),
        })
        .unwrap_or_else(|| body.trim().to_string());
    tracing::error!(vendor, status = status.as_u16(), %message, "Vendor request failed");
    AgentError::Provider(format!("{vendor} API error ({status}): {message}"))
}

/// Copy passthrough parameters into a request body without clobbering
/// fields the adapter already set
pub(crate) fn merge_extra(body: &mut Map<String, Value>, extra: &BTreeMap<String, Value>) {
    for (key, value) in extra {
        body.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_extraction() {
        let err = map_http_error(
            "OpenAI",
            StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#,
        );
        assert!(err.to_string().contains("Incorrect API key provided"));
        assert!(err.to_string().contains("401"));

        let err = map_http_error("HF", StatusCode::SERVICE_UNAVAILABLE, r#"{"error": "Model is loading"}"#);
        assert!(err.to_string().contains("Model is loading"));

        let err = map_http_error("X", StatusCode::BAD_GATEWAY, "upstream down\n");
        assert!(matches!(err, AgentError::Provider(m) if m.ends_with("upstream down")));
    }

    #[test]
    fn test_merge_extra_keeps_adapter_fields() {
        let mut body = json!({"model": "a"}).as_object().cloned().unwrap();
        let extra = BTreeMap::from([
            ("model".to_string(), json!("b")),
            ("seed".to_string(), json!(7)),
        ]);
        merge_extra(&mut body, &extra);
        assert_eq!(body["model"], json!("a"));
        assert_eq!(body["seed"], json!(7));
    }

    #[test]
    fn test_explicit_key_wins() {
        assert_eq!(
            require_api_key("openai", Some("sk-explicit".into())).unwrap(),
            "sk-explicit"
        );
        assert!(require_api_key("no-such-vendor", None).is_err());
    }
}
