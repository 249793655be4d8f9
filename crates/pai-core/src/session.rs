//! Session Management
//!
//! A session is a named JSON file under `sessions/` holding a list of
//! instances. Each `init` (or provider/model switch) appends a new instance;
//! only the last one is ever read from or appended to.
//!
//! API keys are stored encrypted. Loading decrypts the active instance's key
//! in memory, saving seals it again. The `ENV_VAR` sentinel is stored as-is.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{write_atomic, write_atomic_async};
use crate::crypto::{CredentialCipher, ENCRYPTION_KEY_ENV, ENV_VAR_SENTINEL, is_encrypted, needs_cipher};
use crate::error::{AgentError, Result};
use crate::reasoning::{Turn, TurnSink};
use crate::resource::ResourceMetadata;
use crate::tool::ToolDescriptor;

/// One provider/model binding within a session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInstance {
    /// ISO-8601 start time
    pub session_start_dt: String,
    pub provider: String,
    pub model: String,
    /// Sealed key on disk, plaintext in memory after `load`, or `ENV_VAR`
    pub api_key: Option<String>,
    /// Endpoint override handed back to the adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub tool_metadata: Vec<ToolDescriptor>,
    #[serde(default)]
    pub resource_metadata: Vec<ResourceMetadata>,
    #[serde(default)]
    pub prompt_history: Vec<Turn>,
}

impl SessionInstance {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            session_start_dt: chrono::Utc::now().to_rfc3339(),
            provider: provider.into(),
            model: model.into(),
            api_key: Some(ENV_VAR_SENTINEL.into()),
            base_url: None,
            tool_metadata: Vec::new(),
            resource_metadata: Vec::new(),
            prompt_history: Vec::new(),
        }
    }

    /// Store an explicit key; `None` keeps the `ENV_VAR` sentinel
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = Some(api_key.unwrap_or_else(|| ENV_VAR_SENTINEL.into()));
        self
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_capabilities(
        mut self,
        tools: Vec<ToolDescriptor>,
        resources: Vec<ResourceMetadata>,
    ) -> Self {
        self.tool_metadata = tools;
        self.resource_metadata = resources;
        self
    }

    /// Explicit key to hand the adapter, `None` meaning "read the env var"
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| needs_cipher(k))
    }
}

/// On-disk session document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub session_name: String,
    #[serde(default)]
    pub session_instance: Vec<SessionInstance>,
}

impl SessionLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            session_name: name.into(),
            session_instance: Vec::new(),
        }
    }

    /// The active (last) instance
    pub fn active(&self) -> Result<&SessionInstance> {
        self.session_instance
            .last()
            .ok_or_else(|| AgentError::Session(format!("session '{}' has no instances", self.session_name)))
    }

    pub fn active_mut(&mut self) -> Result<&mut SessionInstance> {
        let name = self.session_name.clone();
        self.session_instance
            .last_mut()
            .ok_or_else(|| AgentError::Session(format!("session '{name}' has no instances")))
    }
}

/// Reads and writes session files
#[derive(Clone)]
pub struct SessionStore {
    dir: PathBuf,
    passphrase: Option<String>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("dir", &self.dir)
            .field("has_key", &self.passphrase.is_some())
            .finish()
    }
}

impl SessionStore {
    /// Store whose cipher key comes from `PAI_ENCRYPTION_KEY`, read lazily
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            passphrase: None,
        }
    }

    /// Store with an explicit cipher passphrase
    pub fn with_passphrase(dir: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            passphrase: Some(passphrase.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_ok_and(|p| p.exists())
    }

    /// Saved session names, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(&self.dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Start a new instance, creating the session if needed. Earlier
    /// instances on disk are kept.
    pub fn init(&self, name: &str, instance: SessionInstance) -> Result<SessionLog> {
        // the previous active key stays sealed on disk
        let mut log = if self.exists(name) {
            self.read(name)?
        } else {
            SessionLog::new(name)
        };
        tracing::info!(
            session = name,
            provider = %instance.provider,
            model = %instance.model,
            instance = log.session_instance.len() + 1,
            "Starting session instance"
        );
        log.session_instance.push(instance);
        self.save(&log)?;
        Ok(log)
    }

    /// Read a session and decrypt its active key in memory
    pub fn load(&self, name: &str) -> Result<SessionLog> {
        let mut log = self.read(name)?;

        if let Some(instance) = log.session_instance.last_mut() {
            if let Some(stored) = instance.api_key.as_deref().filter(|k| is_encrypted(k)) {
                let plain = self.cipher()?.decrypt(stored)?;
                instance.api_key = Some(plain);
            }
        }
        tracing::debug!(session = name, instances = log.session_instance.len(), "Loaded session");
        Ok(log)
    }

    /// Write a session, sealing the active instance's key
    pub fn save(&self, log: &SessionLog) -> Result<()> {
        let path = self.path(&log.session_name)?;
        write_atomic(&path, self.sealed_json(log)?.as_bytes())?;
        tracing::debug!(session = %log.session_name, "Saved session");
        Ok(())
    }

    /// [`save`](Self::save) without blocking the runtime
    pub async fn save_async(&self, log: &SessionLog) -> Result<()> {
        let path = self.path(&log.session_name)?;
        write_atomic_async(&path, self.sealed_json(log)?.as_bytes()).await?;
        tracing::debug!(session = %log.session_name, "Saved session");
        Ok(())
    }

    fn sealed_json(&self, log: &SessionLog) -> Result<String> {
        let mut sealed = log.clone();
        if let Some(instance) = sealed.session_instance.last_mut() {
            if let Some(key) = instance
                .api_key
                .as_deref()
                .filter(|k| needs_cipher(k) && !is_encrypted(k))
            {
                instance.api_key = Some(self.cipher()?.encrypt(key)?);
            }
        }
        Ok(serde_json::to_string_pretty(&sealed)?)
    }

    /// Read a session as stored, every key left sealed
    pub fn read(&self, name: &str) -> Result<SessionLog> {
        let path = self.path(name)?;
        if !path.exists() {
            return Err(AgentError::NotFound(format!("session '{name}'")));
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| AgentError::Session(format!("session '{name}' is corrupt: {e}")))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path(name)?;
        if !path.exists() {
            return Err(AgentError::NotFound(format!("session '{name}'")));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn cipher(&self) -> Result<CredentialCipher> {
        match &self.passphrase {
            Some(passphrase) => CredentialCipher::from_passphrase(passphrase),
            None => CredentialCipher::from_env().map_err(|_| {
                AgentError::EncryptionConfig(format!(
                    "Encryption key not set in {ENCRYPTION_KEY_ENV}; required to read or store API keys"
                ))
            }),
        }
    }
}

/// Appends each turn to the active instance and saves immediately
pub struct SessionRecorder<'a> {
    store: &'a SessionStore,
    log: &'a mut SessionLog,
}

impl<'a> SessionRecorder<'a> {
    pub fn new(store: &'a SessionStore, log: &'a mut SessionLog) -> Self {
        Self { store, log }
    }
}

#[async_trait]
impl<'a> TurnSink for SessionRecorder<'a> {
    async fn record(&mut self, turn: &Turn) -> Result<()> {
        self.log.active_mut()?.prompt_history.push(turn.clone());
        self.store.save_async(self.log).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(AgentError::InvalidArgument(format!("invalid session name '{name}'")))
    }
}
