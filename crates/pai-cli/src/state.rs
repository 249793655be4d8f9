//! Application State

use std::sync::Arc;

use pai_core::{
    ProviderRegistry, ResourceRegistry, SessionStore, ToolRegistry,
    config::{PaiPaths, Selection, Settings, selection_env},
    resource::ResourceMetadata,
    tool::{ToolDescriptor, register_builtin_tools},
};

/// Everything a command needs, built once per invocation
pub struct AppState {
    pub paths: PaiPaths,
    pub settings: Settings,
    pub providers: ProviderRegistry,
    pub tools: Arc<ToolRegistry>,
    pub resources: ResourceRegistry,
    pub sessions: SessionStore,
}

impl AppState {
    /// Load every registry from the data directory
    pub fn load(paths: PaiPaths) -> pai_core::Result<Self> {
        paths.ensure()?;
        let settings = Settings::load(&paths.settings_file())?;

        let mut providers = ProviderRegistry::load(paths.providers_file())?;
        pai_runtime::register_builtin_providers(&mut providers);

        let mut tools = ToolRegistry::new();
        register_builtin_tools(&mut tools);

        let resources = ResourceRegistry::load(paths.resources_file())?;
        let sessions = SessionStore::new(paths.sessions_dir());

        tracing::debug!(
            root = %paths.root().display(),
            providers = providers.names().len(),
            tools = tools.len(),
            resources = resources.len(),
            "Loaded application state"
        );

        Ok(Self {
            paths,
            settings,
            providers,
            tools: Arc::new(tools),
            resources,
            sessions,
        })
    }

    /// Live tool and resource metadata, snapshotted into new session instances
    pub fn capabilities(&self) -> (Vec<ToolDescriptor>, Vec<ResourceMetadata>) {
        (self.tools.describe_all(), self.resources.list_metadata())
    }

    /// Provider/model for commands that take `--provider` / `--model`
    pub fn select(&self, provider_flag: Option<&str>, model_flag: Option<&str>) -> (String, Option<String>) {
        let (provider_env, model_env) = selection_env();
        Selection {
            provider_flag,
            model_flag,
            provider_env,
            model_env,
            settings: Some(&self.settings),
            registry_default: self.providers.default_provider(),
        }
        .resolve()
    }
}
