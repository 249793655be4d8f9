//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Name or alias matched no registered provider
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Provider exists but is disabled in the provider config
    #[error("Provider is disabled: {0}")]
    ProviderDisabled(String),

    /// Blank input handed to `generate`
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    /// Vendor call failed (network, auth, quota)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider lacks an optional capability
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Tool, resource, session or provider entry absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Declared local file path does not exist
    #[error("File not found: {0}")]
    FileMissing(String),

    /// Caller passed an out-of-range or malformed argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unparseable JSON in a detected action block. The parser skips these.
    #[error("Malformed action request: {0}")]
    MalformedActionRequest(String),

    /// Encryption key missing when a stored credential must be read or written
    #[error("Encryption configuration error: {0}")]
    EncryptionConfig(String),

    /// Cipher failure (bad ciphertext, wrong key)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Registry file failed schema validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote resource could not be fetched
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownProvider(name) => {
                format!("Unknown provider '{name}'. Use 'pai providers list' to see available providers.")
            }
            Self::ProviderDisabled(name) => {
                format!("Provider '{name}' is disabled. Enable it with 'pai providers enable {name}'.")
            }
            Self::EmptyPrompt => "Prompt cannot be empty.".into(),
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::EncryptionConfig(_) => {
                "Stored API keys need PAI_ENCRYPTION_KEY to be set.".into()
            }
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::FileMissing(path) => format!("File not found: {path}"),
            _ => self.to_string(),
        }
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_messages() {
        assert_eq!(AgentError::EmptyPrompt.to_string(), "Prompt cannot be empty");
        assert_eq!(
            AgentError::UnknownProvider("foo".into()).to_string(),
            "Unknown provider: foo"
        );
        assert_eq!(
            AgentError::ProviderDisabled("hf".into()).user_message(),
            "Provider 'hf' is disabled. Enable it with 'pai providers enable hf'."
        );
        assert_eq!(AgentError::Config("x".into()).user_message(), "Configuration error: x");
    }
}
