//! Configuration
//!
//! Data directory layout, user settings, provider/model resolution and
//! per-provider API key environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Overrides the data directory (default `~/.pai`)
pub const HOME_ENV: &str = "PAI_HOME";
/// Overrides the provider for one invocation
pub const PROVIDER_ENV: &str = "PAI_PROVIDER";
/// Overrides the model for one invocation
pub const MODEL_ENV: &str = "PAI_MODEL";

/// Provider used when nothing else selects one
pub const FALLBACK_PROVIDER: &str = "openai";

/// Locations of every file the CLI reads or writes
#[derive(Clone, Debug)]
pub struct PaiPaths {
    root: PathBuf,
}

impl PaiPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$PAI_HOME`, else `~/.pai`
    pub fn from_env() -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(home));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| AgentError::Config("cannot determine home directory".into()))?;
        Ok(Self::new(home.join(".pai")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn providers_file(&self) -> PathBuf {
        self.root.join("providers.toml")
    }

    pub fn resources_file(&self) -> PathBuf {
        self.root.join("resources.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Create the data directory tree if missing
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.sessions_dir())?;
        Ok(())
    }
}

/// Non-secret user preferences, stored under `[pai]` in `config.toml`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    pai: Settings,
}

impl Settings {
    /// Read settings; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let file: SettingsFile = toml::from_str(&text)?;
        Ok(file.pai)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(&SettingsFile { pai: self.clone() })?;
        write_atomic(path, text.as_bytes())
    }
}

/// Inputs to provider/model selection, highest precedence first
#[derive(Clone, Debug, Default)]
pub struct Selection<'a> {
    pub provider_flag: Option<&'a str>,
    pub model_flag: Option<&'a str>,
    pub provider_env: Option<String>,
    pub model_env: Option<String>,
    pub settings: Option<&'a Settings>,
    pub registry_default: Option<&'a str>,
}

impl Selection<'_> {
    /// Pick a provider name and an optional model.
    ///
    /// Precedence: flag > env > settings file > registry default > fallback.
    /// A missing model means "the provider's own default".
    pub fn resolve(&self) -> (String, Option<String>) {
        let provider = self
            .provider_flag
            .map(str::to_string)
            .or_else(|| self.provider_env.clone())
            .or_else(|| self.settings.and_then(|s| s.provider.clone()))
            .or_else(|| self.registry_default.map(str::to_string))
            .unwrap_or_else(|| FALLBACK_PROVIDER.to_string());
        let model = self
            .model_flag
            .map(str::to_string)
            .or_else(|| self.model_env.clone())
            .or_else(|| self.settings.and_then(|s| s.model.clone()));
        (provider, model)
    }
}

/// Read `PAI_PROVIDER` / `PAI_MODEL`, ignoring empty values
pub fn selection_env() -> (Option<String>, Option<String>) {
    let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    (read(PROVIDER_ENV), read(MODEL_ENV))
}

/// Environment variables consulted for a provider's API key, in order
pub fn api_key_env_vars(provider: &str) -> &'static [&'static str] {
    match provider.to_ascii_lowercase().as_str() {
        "openai" => &["OPENAI_API_KEY"],
        "anthropic" => &["ANTHROPIC_API_KEY"],
        "gemini" | "google" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "huggingface" | "hf" => &["HUGGINGFACE_INFERENCE_TOKEN", "HF_TOKEN"],
        "mistral" => &["MISTRAL_API_KEY"],
        "groq" => &["GROQ_API_KEY"],
        _ => &[],
    }
}

/// First non-empty API key found in the provider's environment variables
pub fn api_key_from_env(provider: &str) -> Option<String> {
    api_key_env_vars(provider)
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

/// Write to a sibling temp file, then rename over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// [`write_atomic`] on the async runtime
pub async fn write_atomic_async(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = PaiPaths::new("/tmp/pai-home");
        assert_eq!(paths.sessions_dir(), PathBuf::from("/tmp/pai-home/sessions"));
        assert_eq!(paths.providers_file(), PathBuf::from("/tmp/pai-home/providers.toml"));
        assert_eq!(paths.resources_file(), PathBuf::from("/tmp/pai-home/resources.json"));
    }

    #[test]
    fn test_settings_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());

        let settings = Settings {
            provider: Some("anthropic".into()),
            model: None,
        };
        settings.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[pai]"));
        assert_eq!(Settings::load(&path).unwrap(), settings);
        assert!(!dir.path().join("config.toml.tmp").exists());
    }

    #[test]
    fn test_selection_precedence() {
        let settings = Settings {
            provider: Some("gemini".into()),
            model: Some("gemini-pro".into()),
        };
        let mut sel = Selection {
            settings: Some(&settings),
            registry_default: Some("ollama"),
            ..Default::default()
        };
        assert_eq!(sel.resolve(), ("gemini".into(), Some("gemini-pro".into())));

        sel.provider_env = Some("anthropic".into());
        assert_eq!(sel.resolve().0, "anthropic");

        sel.provider_flag = Some("openai");
        sel.model_flag = Some("gpt-4o");
        assert_eq!(sel.resolve(), ("openai".into(), Some("gpt-4o".into())));

        let bare = Selection::default();
        assert_eq!(bare.resolve(), (FALLBACK_PROVIDER.into(), None));
    }

    #[test]
    fn test_api_key_env_names() {
        assert_eq!(api_key_env_vars("OpenAI"), &["OPENAI_API_KEY"]);
        assert_eq!(api_key_env_vars("google"), &["GEMINI_API_KEY", "GOOGLE_API_KEY"]);
        assert!(api_key_env_vars("ollama").is_empty());
    }
}
