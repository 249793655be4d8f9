//! Provider Registry
//!
//! Maps provider names and aliases to adapter factories. Factories are keyed
//! by a class path (e.g. `pai_runtime::openai::OpenAiProvider`); the persisted
//! config maps each provider name to a class, an enabled flag and aliases.
//!
//! The backing file is rewritten in full after every mutation. Concurrent
//! writers from different processes race (last writer wins).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::write_atomic;
use crate::error::{AgentError, Result};
use crate::provider::LlmProvider;

/// Constructor arguments handed to a provider factory
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderArgs {
    /// Model to bind; `None` selects the adapter's default
    pub model: Option<String>,
    /// API key; `None` makes the adapter read its environment variable
    pub api_key: Option<String>,
    /// Endpoint override for proxies and self-hosted gateways
    pub base_url: Option<String>,
}

impl ProviderArgs {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Builds a fresh adapter; called once per instantiation, never pooled
pub type ProviderFactory =
    Arc<dyn Fn(ProviderArgs) -> Result<Box<dyn LlmProvider>> + Send + Sync>;

/// Persisted metadata for one provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub class: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

const fn default_enabled() -> bool {
    true
}

/// On-disk shape of `providers.toml`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidersFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
}

/// Listing view of one provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub default: bool,
    pub enabled: bool,
    /// Whether an implementation is registered for the class path
    pub registered: bool,
    /// Whether the provider was registered in code (and so cannot be removed)
    pub builtin: bool,
    pub class_path: String,
    pub aliases: Vec<String>,
}

/// Outcome of `add_alias`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasOutcome {
    Added,
    AlreadyPresent,
}

/// Registry of provider types
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
    builtins: BTreeMap<String, String>,
    config: ProvidersFile,
    path: Option<PathBuf>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("path", &self.path)
            .finish()
    }
}

impl ProviderRegistry {
    /// In-memory registry with no backing file
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            builtins: BTreeMap::new(),
            config: ProvidersFile::default(),
            path: None,
        }
    }

    /// Registry backed by a `providers.toml`; a missing file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let mut config: ProvidersFile = toml::from_str(&text)?;
            config.providers = config
                .providers
                .into_iter()
                .map(|(name, entry)| (normalize(&name), entry))
                .collect();
            config.default = config.default.map(|d| normalize(&d));
            config
        } else {
            ProvidersFile::default()
        };
        tracing::debug!(path = %path.display(), providers = config.providers.len(), "Loaded provider config");
        Ok(Self {
            factories: BTreeMap::new(),
            builtins: BTreeMap::new(),
            config,
            path: Some(path),
        })
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a provider implementation under `name`.
    ///
    /// Persisted metadata for `name` (enabled flag, aliases) takes precedence
    /// over `aliases` given here. Nothing is written to disk.
    pub fn register(
        &mut self,
        name: &str,
        class_path: &str,
        factory: ProviderFactory,
        aliases: &[&str],
    ) {
        let name = normalize(name);
        self.factories.insert(class_path.to_string(), factory);
        self.builtins.insert(name.clone(), class_path.to_string());

        if !self.config.providers.contains_key(&name) {
            let aliases = aliases
                .iter()
                .map(|a| normalize(a))
                .filter(|a| self.alias_owner(a).is_none() && !self.config.providers.contains_key(a))
                .collect();
            self.config.providers.insert(
                name.clone(),
                ProviderEntry {
                    enabled: true,
                    class: class_path.to_string(),
                    aliases,
                },
            );
        }
        tracing::debug!(provider = %name, class = class_path, "Registered provider");
    }

    /// Resolve a name or alias to the canonical provider name
    pub fn resolve(&self, name_or_alias: &str) -> Result<String> {
        let key = normalize(name_or_alias);
        if self.config.providers.contains_key(&key) {
            return Ok(key);
        }
        self.alias_owner(&key)
            .map(str::to_string)
            .ok_or_else(|| AgentError::UnknownProvider(name_or_alias.to_string()))
    }

    /// Construct a fresh adapter for a provider name or alias
    pub fn instantiate(&self, name: &str, args: ProviderArgs) -> Result<Box<dyn LlmProvider>> {
        let name = self.resolve(name)?;
        let entry = self
            .config
            .providers
            .get(&name)
            .ok_or_else(|| AgentError::UnknownProvider(name.clone()))?;
        if !entry.enabled {
            return Err(AgentError::ProviderDisabled(name));
        }
        let factory = self.factories.get(&entry.class).ok_or_else(|| {
            AgentError::NotFound(format!(
                "no implementation registered for provider class '{}'",
                entry.class
            ))
        })?;
        tracing::debug!(provider = %name, model = ?args.model, "Instantiating provider");
        factory(args)
    }

    /// Alias of [`instantiate`](Self::instantiate)
    pub fn create(&self, name_or_alias: &str, args: ProviderArgs) -> Result<Box<dyn LlmProvider>> {
        self.instantiate(name_or_alias, args)
    }

    /// Name-sorted view of every known provider
    pub fn list(&self) -> Vec<ProviderSummary> {
        self.config
            .providers
            .iter()
            .map(|(name, entry)| ProviderSummary {
                name: name.clone(),
                default: self.config.default.as_deref() == Some(name.as_str()),
                enabled: entry.enabled,
                registered: self.factories.contains_key(&entry.class),
                builtin: self.builtins.contains_key(name),
                class_path: entry.class.clone(),
                aliases: entry.aliases.clone(),
            })
            .collect()
    }

    /// Canonical names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.config.providers.keys().map(String::as_str).collect()
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.config.default.as_deref()
    }

    pub fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.config.providers.get(name)
    }

    /// Add a provider entry mapping `name` to an implementation class
    pub fn add_provider(
        &mut self,
        name: &str,
        class_path: &str,
        aliases: &[String],
        enabled: bool,
    ) -> Result<()> {
        let name = normalize(name);
        if name.is_empty() {
            return Err(AgentError::InvalidArgument("provider name cannot be empty".into()));
        }
        if self.config.providers.contains_key(&name) {
            return Err(AgentError::InvalidArgument(format!(
                "provider '{name}' already exists"
            )));
        }
        if let Some(owner) = self.alias_owner(&name) {
            return Err(AgentError::InvalidArgument(format!(
                "'{name}' is already an alias of provider '{owner}'"
            )));
        }
        let mut clean = Vec::new();
        for alias in aliases.iter().map(|a| normalize(a)).filter(|a| !a.is_empty()) {
            self.check_alias_free(&alias, &name)?;
            if alias != name && !clean.contains(&alias) {
                clean.push(alias);
            }
        }
        if !self.factories.contains_key(class_path) {
            tracing::warn!(provider = %name, class = class_path, "No implementation registered for class");
        }
        self.config.providers.insert(
            name.clone(),
            ProviderEntry {
                enabled,
                class: class_path.to_string(),
                aliases: clean,
            },
        );
        tracing::info!(provider = %name, class = class_path, "Added provider");
        self.persist()
    }

    /// Remove a provider added with `add_provider`
    pub fn remove_provider(&mut self, name_or_alias: &str) -> Result<()> {
        let name = self.resolve(name_or_alias)?;
        if self.builtins.contains_key(&name) {
            return Err(AgentError::InvalidArgument(format!(
                "built-in provider '{name}' cannot be removed; disable it instead"
            )));
        }
        self.config.providers.remove(&name);
        if self.config.default.as_deref() == Some(name.as_str()) {
            self.config.default = None;
        }
        tracing::info!(provider = %name, "Removed provider");
        self.persist()
    }

    pub fn enable(&mut self, name_or_alias: &str) -> Result<()> {
        self.set_enabled(name_or_alias, true)
    }

    pub fn disable(&mut self, name_or_alias: &str) -> Result<()> {
        self.set_enabled(name_or_alias, false)
    }

    fn set_enabled(&mut self, name_or_alias: &str, enabled: bool) -> Result<()> {
        let name = self.resolve(name_or_alias)?;
        if let Some(entry) = self.config.providers.get_mut(&name) {
            entry.enabled = enabled;
        }
        tracing::info!(provider = %name, enabled, "Updated provider");
        self.persist()
    }

    pub fn set_default(&mut self, name_or_alias: &str) -> Result<()> {
        let name = self.resolve(name_or_alias)?;
        tracing::info!(provider = %name, "Set default provider");
        self.config.default = Some(name);
        self.persist()
    }

    /// Attach an alias to a provider (given by name or existing alias)
    pub fn add_alias(&mut self, name_or_alias: &str, alias: &str) -> Result<AliasOutcome> {
        let name = self.resolve(name_or_alias)?;
        let alias = normalize(alias);
        if alias.is_empty() {
            return Err(AgentError::InvalidArgument("alias cannot be empty".into()));
        }
        if self.alias_owner(&alias) == Some(name.as_str()) {
            return Ok(AliasOutcome::AlreadyPresent);
        }
        self.check_alias_free(&alias, &name)?;
        if let Some(entry) = self.config.providers.get_mut(&name) {
            entry.aliases.push(alias.clone());
        }
        tracing::info!(provider = %name, alias = %alias, "Added alias");
        self.persist()?;
        Ok(AliasOutcome::Added)
    }

    /// Remove an alias; returns the provider that owned it, or `None` if unknown
    pub fn remove_alias(&mut self, alias: &str) -> Result<Option<String>> {
        let alias = normalize(alias);
        let Some(owner) = self.alias_owner(&alias).map(str::to_string) else {
            return Ok(None);
        };
        if let Some(entry) = self.config.providers.get_mut(&owner) {
            entry.aliases.retain(|a| normalize(a) != alias);
        }
        tracing::info!(provider = %owner, alias = %alias, "Removed alias");
        self.persist()?;
        Ok(Some(owner))
    }

    fn alias_owner(&self, alias: &str) -> Option<&str> {
        self.config
            .providers
            .iter()
            .find(|(_, entry)| entry.aliases.iter().any(|a| normalize(a) == alias))
            .map(|(name, _)| name.as_str())
    }

    fn check_alias_free(&self, alias: &str, for_provider: &str) -> Result<()> {
        if alias != for_provider && self.config.providers.contains_key(alias) {
            return Err(AgentError::InvalidArgument(format!(
                "alias '{alias}' collides with provider name '{alias}'"
            )));
        }
        match self.alias_owner(alias) {
            Some(owner) if owner != for_provider => Err(AgentError::InvalidArgument(format!(
                "alias '{alias}' is already used by provider '{owner}'"
            ))),
            _ => Ok(()),
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = toml::to_string_pretty(&self.config)?;
        write_atomic(path, text.as_bytes())?;
        tracing::debug!(path = %path.display(), "Saved provider config");
        Ok(())
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
