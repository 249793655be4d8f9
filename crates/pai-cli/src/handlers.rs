//! Command Handlers

use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use pai_core::{
    Agent, AgentError, GenerationOptions, LlmProvider, LoopOutcome, ProviderArgs, ProviderRegistry,
    ResourceRegistry, ResourceRequest, SessionInstance, SessionLog, SessionStore, ToolRegistry,
    crypto::ENCRYPTION_KEY_ENV,
    registry::{AliasOutcome, ProviderSummary},
    resource::{ResourceMetadata, ResourceSpec},
    session::SessionRecorder,
    tool::ToolDescriptor,
};

use crate::state::AppState;

/// Prompt sent by `pai test` when none is given
pub const DEFAULT_TEST_PROMPT: &str = "Write a haiku about coding";

/// Top-level error text; library errors get their friendlier wording
pub fn describe(err: &anyhow::Error) -> String {
    err.downcast_ref::<AgentError>()
        .map_or_else(|| format!("{err:#}"), AgentError::user_message)
}

// ============================================================================
// Sessions
// ============================================================================

/// What a new session instance binds to
#[derive(Clone, Debug, Default)]
pub struct Binding {
    /// Provider name or alias
    pub provider: String,
    /// `None` takes the adapter's default
    pub model: Option<String>,
    /// `None` stores the `ENV_VAR` sentinel
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Append a new active instance to `session`.
///
/// The adapter is constructed first, so a missing key or unknown provider
/// fails before anything is written.
pub fn start_instance(
    providers: &ProviderRegistry,
    sessions: &SessionStore,
    capabilities: (Vec<ToolDescriptor>, Vec<ResourceMetadata>),
    session: &str,
    binding: Binding,
) -> pai_core::Result<SessionLog> {
    let name = providers.resolve(&binding.provider)?;
    let adapter = providers.instantiate(
        &name,
        ProviderArgs {
            model: binding.model,
            api_key: binding.api_key.clone(),
            base_url: binding.base_url.clone(),
        },
    )?;

    let (tools, resources) = capabilities;
    let instance = SessionInstance::new(&name, adapter.model())
        .with_api_key(binding.api_key)
        .with_base_url(binding.base_url)
        .with_capabilities(tools, resources);
    sessions.init(session, instance)
}

/// Agent bound to a session's active instance, advertising its snapshot
pub fn session_agent(
    providers: &ProviderRegistry,
    tools: &Arc<ToolRegistry>,
    resources: &Arc<ResourceRegistry>,
    active: &SessionInstance,
    options: GenerationOptions,
) -> pai_core::Result<Agent> {
    let args = ProviderArgs {
        model: Some(active.model.clone()),
        api_key: active.credential().map(str::to_string),
        base_url: active.base_url.clone(),
    };
    let provider: Arc<dyn LlmProvider> = Arc::from(providers.create(&active.provider, args)?);

    Agent::builder()
        .provider(provider)
        .tools(Arc::clone(tools))
        .resources(Arc::clone(resources))
        .options(options)
        .capabilities(active.tool_metadata.clone(), active.resource_metadata.clone())
        .build()
}

/// Bind a session to a provider/model, starting a new instance
pub fn init(state: &AppState, session: &str, binding: Binding) -> Result<()> {
    let log = start_instance(
        &state.providers,
        &state.sessions,
        state.capabilities(),
        session,
        binding,
    )?;
    let active = log.active()?;
    println!(
        "Session '{session}' initialized with {} ({}), instance {}",
        active.provider,
        active.model,
        log.session_instance.len()
    );
    Ok(())
}

/// Arguments of `pai prompt`
#[derive(Clone, Debug)]
pub struct PromptRequest {
    pub session: String,
    pub text: Option<String>,
    pub file: Option<std::path::PathBuf>,
    pub iterations: usize,
    pub params: Vec<String>,
    pub json: bool,
}

/// `pai prompt --json` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PromptReply {
    pub reply: String,
    pub session: String,
    pub instance: usize,
    pub provider: String,
    pub model: String,
    pub generate_calls: usize,
    pub tools_used: Vec<String>,
    pub resources_used: Vec<String>,
    pub budget_exhausted: bool,
}

impl PromptReply {
    fn new(log: &SessionLog, outcome: LoopOutcome) -> pai_core::Result<Self> {
        let active = log.active()?;
        Ok(Self {
            reply: outcome.answer,
            session: log.session_name.clone(),
            instance: log.session_instance.len(),
            provider: active.provider.clone(),
            model: active.model.clone(),
            generate_calls: outcome.generate_calls,
            tools_used: outcome.tools_used.into_iter().map(|t| t.name).collect(),
            resources_used: outcome.resources_used.iter().map(resource_label).collect(),
            budget_exhausted: outcome.budget_exhausted,
        })
    }
}

/// Run the agent loop for one prompt within a session
pub async fn prompt(state: AppState, request: PromptRequest) -> Result<()> {
    let json = request.json;
    let reply = run_prompt(state, request).await?;
    println!("{}", render_reply(&reply, json)?);
    Ok(())
}

async fn run_prompt(state: AppState, request: PromptRequest) -> Result<PromptReply> {
    let text = read_prompt(request.text, request.file.as_deref())?;
    let options = GenerationOptions::from_params(&request.params)?;

    let mut log = state.sessions.load(&request.session)?;
    let resources = Arc::new(state.resources);
    let agent = session_agent(&state.providers, &state.tools, &resources, log.active()?, options)?;

    let mut recorder = SessionRecorder::new(&state.sessions, &mut log);
    let outcome = agent.run(&text, request.iterations, &mut recorder).await?;
    if outcome.budget_exhausted {
        tracing::warn!(iterations = request.iterations, "Answer forced after the iteration budget ran out");
    }
    tracing::info!(
        generate_calls = outcome.generate_calls,
        tools = outcome.tools_used.len(),
        resources = outcome.resources_used.len(),
        "Prompt complete"
    );

    Ok(PromptReply::new(&log, outcome)?)
}

fn render_reply(reply: &PromptReply, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string(reply)?)
    } else {
        Ok(reply.reply.clone())
    }
}

/// Prompt text from `--file`, else the argument, else piped stdin
fn read_prompt(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read prompt file {}", path.display()));
    }
    if let Some(text) = text {
        return Ok(text);
    }
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("No input provided. Pass the prompt text, --file, or pipe it on stdin.");
    }
    let mut buf = String::new();
    stdin.read_to_string(&mut buf)?;
    Ok(buf)
}

/// Name (else ID) a resource request was made by
pub fn resource_label(request: &ResourceRequest) -> String {
    request.name().or_else(|| request.id()).unwrap_or("?").to_string()
}

/// Print the active instance's turns
pub fn history(state: &AppState, session: &str, last: Option<usize>, json: bool) -> Result<()> {
    let log = state.sessions.read(session)?;
    let active = log.active()?;
    let turns = &active.prompt_history;
    let skip = last.map_or(0, |n| turns.len().saturating_sub(n));

    if json {
        println!("{}", serde_json::to_string_pretty(&turns[skip..])?);
        return Ok(());
    }

    println!(
        "Session '{session}': {} ({}) since {}",
        active.provider, active.model, active.session_start_dt
    );
    if turns.is_empty() {
        println!("No history yet.");
        return Ok(());
    }
    for (i, turn) in turns.iter().enumerate().skip(skip) {
        println!("\n[{}] prompt:\n{}", i + 1, turn.prompt);
        println!("\n[{}] response:\n{}", i + 1, turn.response);
        if !turn.tool_used.is_empty() {
            let names: Vec<&str> = turn.tool_used.iter().map(|t| t.name.as_str()).collect();
            println!("  tools used: {}", names.join(", "));
        }
        if !turn.resource_used.is_empty() {
            let names: Vec<String> = turn.resource_used.iter().map(resource_label).collect();
            println!("  resources used: {}", names.join(", "));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    name: String,
    provider: Option<String>,
    model: Option<String>,
    instances: usize,
    turns: usize,
}

/// One summary per readable session file
fn session_summaries(sessions: &SessionStore) -> Result<Vec<SessionStatus>> {
    let mut summaries = Vec::new();
    for name in sessions.list()? {
        match sessions.read(&name) {
            Ok(log) => {
                let active = log.session_instance.last();
                summaries.push(SessionStatus {
                    provider: active.map(|a| a.provider.clone()),
                    model: active.map(|a| a.model.clone()),
                    instances: log.session_instance.len(),
                    turns: active.map_or(0, |a| a.prompt_history.len()),
                    name,
                });
            }
            Err(e) => tracing::warn!(session = %name, error = %e, "Skipping unreadable session"),
        }
    }
    Ok(summaries)
}

fn render_session(s: &SessionStatus) -> String {
    format!(
        "{} - {} ({}), {} instance(s), {} turn(s)",
        s.name,
        s.provider.as_deref().unwrap_or("?"),
        s.model.as_deref().unwrap_or("?"),
        s.instances,
        s.turns
    )
}

pub fn sessions_list(state: &AppState, json: bool) -> Result<()> {
    let summaries = session_summaries(&state.sessions)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("No saved sessions.");
    } else {
        for s in &summaries {
            println!("{}", render_session(s));
        }
    }
    Ok(())
}

pub fn sessions_delete(state: &AppState, session: &str) -> Result<()> {
    state.sessions.delete(session)?;
    println!("Deleted session '{session}'");
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    data_dir: String,
    provider: String,
    model: Option<String>,
    default_provider: Option<String>,
    encryption_key_set: bool,
    sessions: Vec<SessionStatus>,
}

/// Current selection and saved sessions
pub fn status(state: &AppState, json: bool) -> Result<()> {
    let (provider, model) = state.select(None, None);
    let report = StatusReport {
        data_dir: state.paths.root().display().to_string(),
        provider,
        model,
        default_provider: state.providers.default_provider().map(str::to_string),
        encryption_key_set: std::env::var(ENCRYPTION_KEY_ENV).is_ok_and(|k| !k.is_empty()),
        sessions: session_summaries(&state.sessions)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("data dir:   {}", report.data_dir);
    println!("provider:   {}", report.provider);
    println!("model:      {}", report.model.as_deref().unwrap_or("(provider default)"));
    println!(
        "encryption: {}",
        if report.encryption_key_set { "key set" } else { "no key (stored API keys unavailable)" }
    );
    if report.sessions.is_empty() {
        println!("sessions:   (none)");
    } else {
        println!("sessions:");
        for s in &report.sessions {
            println!("  {}", render_session(s));
        }
    }
    Ok(())
}

// ============================================================================
// Providers and models
// ============================================================================

/// One-shot request to the resolved provider, outside any session
pub async fn test(
    state: &AppState,
    provider: Option<&str>,
    model: Option<&str>,
    base_url: Option<String>,
    prompt: &str,
) -> Result<()> {
    let (provider, model) = state.select(provider, model);
    let adapter = state.providers.create(
        &provider,
        ProviderArgs {
            model,
            base_url,
            ..ProviderArgs::default()
        },
    )?;
    let model = adapter.model().to_string();
    println!("Testing {} ({model})...", adapter.name());

    if adapter.supports_model_listing() {
        let models = adapter.list_models().await?;
        if !has_model(&models, &model) {
            bail!(
                "Unknown model '{model}'. Run 'pai models --provider {}' to see available models.",
                adapter.name()
            );
        }
    }

    let response = adapter.generate(prompt, &GenerationOptions::default()).await?;
    println!("OK: provider responded.");
    println!("Response: {response}");
    Ok(())
}

/// List a provider's models
pub async fn models(
    state: &AppState,
    provider: Option<&str>,
    base_url: Option<String>,
    grep: Option<&str>,
    json: bool,
) -> Result<()> {
    let (provider, _) = state.select(provider, None);
    let adapter = state.providers.create(
        &provider,
        ProviderArgs {
            base_url,
            ..ProviderArgs::default()
        },
    )?;
    if !adapter.supports_model_listing() {
        bail!("Provider '{}' does not support listing models.", adapter.name());
    }
    let models = filter_models(adapter.list_models().await?, grep);

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else if models.is_empty() {
        println!("No models found.");
    } else {
        println!("Provider: {}", adapter.name());
        for m in models {
            println!("  - {m}");
        }
    }
    Ok(())
}

/// Ollama reports tagged names (`llama3.2:latest`); an untagged model matches them
fn has_model(models: &[String], model: &str) -> bool {
    models
        .iter()
        .any(|m| m == model || m.strip_prefix(model).is_some_and(|rest| rest.starts_with(':')))
}

/// Case-insensitive substring filter
fn filter_models(models: Vec<String>, grep: Option<&str>) -> Vec<String> {
    match grep.map(str::to_lowercase) {
        Some(needle) => models
            .into_iter()
            .filter(|m| m.to_lowercase().contains(&needle))
            .collect(),
        None => models,
    }
}

pub fn providers_list(state: &AppState, verbose: bool, json: bool) -> Result<()> {
    let providers = state.providers.list();
    if json {
        println!("{}", serde_json::to_string_pretty(&providers)?);
    } else {
        print!("{}", render_providers(&providers, verbose));
    }
    Ok(())
}

fn render_providers(providers: &[ProviderSummary], verbose: bool) -> String {
    if providers.is_empty() {
        return "No providers found.\n".into();
    }
    let mut out = String::new();
    for p in providers {
        if verbose {
            out.push_str(&format!("name:        {}\n", p.name));
            out.push_str(&format!("  default:    {}\n", p.default));
            out.push_str(&format!("  enabled:    {}\n", p.enabled));
            out.push_str(&format!("  registered: {}\n", p.registered));
            out.push_str(&format!("  builtin:    {}\n", p.builtin));
            out.push_str(&format!("  class_path: {}\n", p.class_path));
            let aliases = if p.aliases.is_empty() { "(none)".to_string() } else { p.aliases.join(", ") };
            out.push_str(&format!("  aliases:    {aliases}\n\n"));
        } else {
            let default = if p.default { " [default]" } else { "" };
            let status = if p.enabled { "enabled" } else { "disabled" };
            let aliases = if p.aliases.is_empty() {
                String::new()
            } else {
                format!(" (aliases: {})", p.aliases.join(", "))
            };
            out.push_str(&format!("{}{default}: {status}{aliases}\n", p.name));
        }
    }
    out
}

pub fn providers_add(
    state: &mut AppState,
    name: &str,
    class_path: &str,
    aliases: Option<&str>,
    disabled: bool,
) -> Result<()> {
    let aliases = split_list(aliases);
    state.providers.add_provider(name, class_path, &aliases, !disabled)?;
    println!("Added {name} -> {class_path}");
    Ok(())
}

pub fn providers_enable(state: &mut AppState, name: &str) -> Result<()> {
    state.providers.enable(name)?;
    println!("Enabled {name}");
    Ok(())
}

pub fn providers_disable(state: &mut AppState, name: &str) -> Result<()> {
    state.providers.disable(name)?;
    println!("Disabled {name}");
    Ok(())
}

pub fn providers_remove(state: &mut AppState, name: &str) -> Result<()> {
    state.providers.remove_provider(name)?;
    println!("Removed {name}");
    Ok(())
}

pub fn providers_default(state: &mut AppState, name: &str) -> Result<()> {
    state.providers.set_default(name)?;
    println!("Default set to {}", state.providers.resolve(name)?);
    Ok(())
}

pub fn providers_add_alias(state: &mut AppState, provider: &str, alias: &str) -> Result<()> {
    let canonical = state.providers.resolve(provider)?;
    match state.providers.add_alias(&canonical, alias)? {
        AliasOutcome::Added => println!("Alias '{alias}' added for provider '{canonical}'."),
        AliasOutcome::AlreadyPresent => {
            println!("Alias '{alias}' already exists for provider '{canonical}'. Nothing to do.");
        }
    }
    Ok(())
}

pub fn providers_remove_alias(state: &mut AppState, alias: &str) -> Result<()> {
    match state.providers.remove_alias(alias)? {
        Some(owner) => println!("Alias '{alias}' removed (was pointing to '{owner}')."),
        None => println!("Alias '{alias}' not found; nothing to remove."),
    }
    Ok(())
}

// ============================================================================
// Resources and tools
// ============================================================================

pub fn resources_list(state: &AppState, json: bool) -> Result<()> {
    let metadata = state.resources.list_metadata();
    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }
    if metadata.is_empty() {
        println!("No resources found.");
        return Ok(());
    }
    for r in metadata {
        println!(
            "{} [{}] {} MB, {} - {}",
            r.name,
            r.content_type.as_deref().unwrap_or("string"),
            r.size,
            r.id,
            r.description
        );
    }
    Ok(())
}

/// Print one resource with its content resolved
pub async fn resources_show(state: &AppState, name_or_id: &str) -> Result<()> {
    let entry = state.resources.get(name_or_id).await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

pub async fn resources_add(state: &mut AppState, spec: ResourceSpec) -> Result<()> {
    let name = spec.name.clone();
    match state.resources.create(spec).await? {
        Some(entry) => println!("Added resource '{}' ({})", entry.name, entry.id),
        None => println!("Resource '{name}' already exists; use 'pai resources update' to change it."),
    }
    Ok(())
}

pub async fn resources_update(state: &mut AppState, spec: ResourceSpec) -> Result<()> {
    let entry = state.resources.update(spec).await?;
    println!("Updated resource '{}' ({})", entry.name, entry.id);
    Ok(())
}

pub fn resources_remove(state: &mut AppState, name_or_id: &str) -> Result<()> {
    let removed = state.resources.delete(name_or_id)?;
    println!("Removed resource '{}' ({})", removed.name, removed.id);
    Ok(())
}

pub fn tools_list(state: &AppState, json: bool) -> Result<()> {
    let tools = state.tools.describe_all();
    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
    } else {
        for tool in &tools {
            print!("{}", render_tool(tool));
        }
    }
    Ok(())
}

fn render_tool(tool: &ToolDescriptor) -> String {
    let mut out = format!("{}: {}\n", tool.name, tool.description);
    for (name, prop) in &tool.parameters.properties {
        let required = if tool.parameters.required.contains(name) { "required" } else { "optional" };
        out.push_str(&format!("  - {name} ({}, {required})", prop.param_type));
        if let Some(description) = &prop.description {
            out.push_str(&format!(": {description}"));
        }
        out.push('\n');
    }
    out
}

// ============================================================================
// Settings
// ============================================================================

pub fn config_show(state: &AppState) {
    println!(
        "provider={}  model={}  file={}",
        state.settings.provider.as_deref().unwrap_or("(default)"),
        state.settings.model.as_deref().unwrap_or("(default)"),
        state.paths.settings_file().display()
    );
}

pub fn config_set(state: &mut AppState, provider: Option<&str>, model: Option<&str>) -> Result<()> {
    if provider.is_none() && model.is_none() {
        bail!("Nothing to set; pass --provider and/or --model.");
    }
    if let Some(provider) = provider {
        state.settings.provider = Some(state.providers.resolve(provider)?);
    }
    if let Some(model) = model {
        state.settings.model = Some(model.to_string());
    }
    state.settings.save(&state.paths.settings_file())?;
    config_show(state);
    Ok(())
}

/// Comma-separated list, blanks dropped
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::state;

    fn binding(provider: &str) -> Binding {
        Binding {
            provider: provider.into(),
            ..Binding::default()
        }
    }

    fn request(session: &str, text: &str) -> PromptRequest {
        PromptRequest {
            session: session.into(),
            text: Some(text.into()),
            file: None,
            iterations: 3,
            params: Vec::new(),
            json: false,
        }
    }

    #[tokio::test]
    async fn test_init_then_prompt_records_history() {
        let dir = tempfile::tempdir().unwrap();
        init(&state(&dir), "work", binding("adding")).unwrap();

        prompt(state(&dir), request("work", "What is 2 + 3?")).await.unwrap();

        let log = state(&dir).sessions.read("work").unwrap();
        let active = log.active().unwrap();
        assert_eq!(active.model, "adder-1");
        assert_eq!(active.api_key.as_deref(), Some("ENV_VAR"));
        assert!(active.tool_metadata.iter().any(|t| t.name == "sum2num"));
        assert_eq!(active.prompt_history.len(), 2);
        assert_eq!(active.prompt_history[1].response, "The sum is 5.");
        assert_eq!(active.prompt_history[1].tool_used[0].name, "sum2num");
    }

    #[tokio::test]
    async fn test_prompt_reply_payload() {
        let dir = tempfile::tempdir().unwrap();
        init(&state(&dir), "work", binding("adding")).unwrap();
        init(
            &state(&dir),
            "work",
            Binding {
                model: Some("adder-9".into()),
                ..binding("summing")
            },
        )
        .unwrap();

        let reply = run_prompt(state(&dir), request("work", "What is 2 + 3?")).await.unwrap();
        assert_eq!(
            reply,
            PromptReply {
                reply: "The sum is 5.".into(),
                session: "work".into(),
                instance: 2,
                provider: "summing".into(),
                model: "adder-9".into(),
                generate_calls: 2,
                tools_used: vec!["sum2num".into()],
                resources_used: Vec::new(),
                budget_exhausted: false,
            }
        );

        let json: serde_json::Value = serde_json::from_str(&render_reply(&reply, true).unwrap()).unwrap();
        assert_eq!(json["reply"], "The sum is 5.");
        assert_eq!(json["session"], "work");
        assert_eq!(json["provider"], "summing");
        assert_eq!(json["model"], "adder-9");
        assert_eq!(json["tools_used"], serde_json::json!(["sum2num"]));
        assert_eq!(render_reply(&reply, false).unwrap(), "The sum is 5.");
    }

    #[tokio::test]
    async fn test_prompt_reads_file_before_text() {
        let dir = tempfile::tempdir().unwrap();
        init(&state(&dir), "work", binding("adding")).unwrap();
        let path = dir.path().join("question.txt");
        std::fs::write(&path, "Add two and three").unwrap();

        let mut req = request("work", "ignored text");
        req.file = Some(path);
        run_prompt(state(&dir), req).await.unwrap();

        let log = state(&dir).sessions.read("work").unwrap();
        let first = &log.active().unwrap().prompt_history[0];
        assert!(first.prompt.starts_with("Add two and three"));
        assert!(!first.prompt.contains("ignored text"));

        let mut missing = request("work", "x");
        missing.file = Some(dir.path().join("nope.txt"));
        let err = run_prompt(state(&dir), missing).await.unwrap_err();
        assert!(describe(&err).starts_with("Cannot read prompt file"));
    }

    #[test]
    fn test_init_unknown_provider_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let err = init(&state, "s", binding("nope")).unwrap_err();
        assert!(describe(&err).contains("Unknown provider 'nope'"));
        assert!(!state.sessions.exists("s"));
    }

    #[test]
    fn test_init_stores_endpoint_and_resolves_casing() {
        let dir = tempfile::tempdir().unwrap();
        init(
            &state(&dir),
            "gw",
            Binding {
                base_url: Some("http://localhost:8080/v1".into()),
                ..binding("Adding")
            },
        )
        .unwrap();
        let log = state(&dir).sessions.read("gw").unwrap();
        let active = log.active().unwrap();
        assert_eq!(active.provider, "adding");
        assert_eq!(active.base_url.as_deref(), Some("http://localhost:8080/v1"));
    }

    #[tokio::test]
    async fn test_prompt_rejects_zero_iterations() {
        let dir = tempfile::tempdir().unwrap();
        init(&state(&dir), "s", binding("adding")).unwrap();
        let mut req = request("s", "hi");
        req.iterations = 0;
        let err = prompt(state(&dir), req).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::InvalidArgument(_))
        ));
        assert!(state(&dir).sessions.read("s").unwrap().active().unwrap().prompt_history.is_empty());
    }

    #[test]
    fn test_session_listing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        init(&state, "b", binding("adding")).unwrap();
        init(&state, "a", binding("summing")).unwrap();

        let summaries = session_summaries(&state.sessions).unwrap();
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(render_session(&summaries[0]), "a - summing (adder-1), 1 instance(s), 0 turn(s)");

        sessions_delete(&state, "a").unwrap();
        assert!(!state.sessions.exists("a"));
        let err = sessions_delete(&state, "a").unwrap_err();
        assert!(describe(&err).contains("session 'a'"));
    }

    #[test]
    fn test_provider_mutations_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut state = state(&dir);
            providers_add_alias(&mut state, "openai", "gpt").unwrap();
            providers_default(&mut state, "gpt").unwrap();
            providers_disable(&mut state, "huggingface").unwrap();
        }
        let state = state(&dir);
        assert_eq!(state.providers.default_provider(), Some("openai"));
        assert_eq!(state.providers.resolve("GPT").unwrap(), "openai");
        assert!(!state.providers.entry("huggingface").unwrap().enabled);
    }

    #[test]
    fn test_render_providers() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        state.providers.set_default("gemini").unwrap();
        let compact = render_providers(&state.providers.list(), false);
        assert!(compact.contains("gemini [default]: enabled (aliases: google)\n"));
        let verbose = render_providers(&state.providers.list(), true);
        assert!(verbose.contains("  class_path: pai_runtime::openai::OpenAiProvider\n"));
        assert_eq!(render_providers(&[], false), "No providers found.\n");
    }

    #[test]
    fn test_model_helpers() {
        let models = vec!["llama3.2:latest".to_string(), "mistral:7b".to_string()];
        assert!(has_model(&models, "llama3.2"));
        assert!(has_model(&models, "mistral:7b"));
        assert!(!has_model(&models, "llama3"));
        assert_eq!(filter_models(models.clone(), Some("LLAMA")), vec!["llama3.2:latest"]);
        assert_eq!(filter_models(models, None).len(), 2);
    }

    #[test]
    fn test_split_list_and_tool_rendering() {
        assert_eq!(split_list(Some("a, b,,c ")), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());

        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let sum = state
            .tools
            .describe_all()
            .into_iter()
            .find(|t| t.name == "sum2num")
            .unwrap();
        let text = render_tool(&sum);
        assert!(text.starts_with("sum2num: "));
        assert!(text.contains("  - a (number, required)"));
    }

    #[tokio::test]
    async fn test_resource_commands_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut state = state(&dir);
            resources_add(&mut state, ResourceSpec::text("notes", "My notes", "hello"))
                .await
                .unwrap();
            // second add is a no-op
            resources_add(&mut state, ResourceSpec::text("notes", "Other", "bye"))
                .await
                .unwrap();
        }
        let mut state = state(&dir);
        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.resources.get("notes").await.unwrap().content, "hello");
        resources_remove(&mut state, "notes").unwrap();
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_config_set_resolves_alias() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut state = state(&dir);
            config_set(&mut state, Some("google"), Some("gemini-1.5-pro")).unwrap();
            assert!(config_set(&mut state, None, None).is_err());
        }
        let state = state(&dir);
        assert_eq!(state.settings.provider.as_deref(), Some("gemini"));
        assert_eq!(state.settings.model.as_deref(), Some("gemini-1.5-pro"));
    }
}
