//! Agent Loop
//!
//! Multi-iteration generate → parse → dispatch → re-prompt cycle.
//!
//! ```text
//! prompt + banner ──► generate ──► parse ──┬─ no actions ──► answer
//!                        ▲                 │
//!                        │                 ▼
//!                  follow-up ◄──── run tools / read resources
//! ```
//!
//! Only the provider call can fail the loop. Parsing skips malformed JSON,
//! and tool/resource failures are embedded in the follow-up prompt as
//! `{"error": ...}` entries. When the iteration budget runs out, one final
//! generate call on the last follow-up prompt is returned as the answer.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{ParsedActions, parse_actions};
use crate::context::{render_capabilities_banner, render_followup_prompt};
use crate::error::{AgentError, Result};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::resource::{ResourceCallResult, ResourceMetadata, ResourceRegistry, ResourceRequest};
use crate::tool::{ToolCallRequest, ToolCallResult, ToolDescriptor, ToolRegistry};

/// Default iteration budget for `pai prompt`
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// One prompt/response exchange
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub prompt: String,
    pub response: String,
    /// Every tool request executed so far in this loop
    pub tool_used: Vec<ToolCallRequest>,
    /// Every resource request resolved so far in this loop
    pub resource_used: Vec<ResourceRequest>,
}

/// Receives each completed turn before the loop continues
#[async_trait]
pub trait TurnSink: Send {
    async fn record(&mut self, turn: &Turn) -> Result<()>;
}

/// Keeps turns in memory
#[async_trait]
impl TurnSink for Vec<Turn> {
    async fn record(&mut self, turn: &Turn) -> Result<()> {
        self.push(turn.clone());
        Ok(())
    }
}

/// Discards turns
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHistory;

#[async_trait]
impl TurnSink for NoHistory {
    async fn record(&mut self, _turn: &Turn) -> Result<()> {
        Ok(())
    }
}

/// Final result of a loop run
#[derive(Clone, Debug, PartialEq)]
pub struct LoopOutcome {
    pub answer: String,
    pub tools_used: Vec<ToolCallRequest>,
    pub resources_used: Vec<ResourceRequest>,
    pub generate_calls: usize,
    /// True when the answer came from the forced call after the budget ran out
    pub budget_exhausted: bool,
}

/// Results of executing one batch of parsed requests
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dispatch {
    pub tool_results: Vec<ToolCallResult>,
    pub resource_results: Vec<ResourceCallResult>,
    /// Resource requests after batch de-duplication
    pub resource_requests: Vec<ResourceRequest>,
}

/// The agent: a provider plus the registries it may call into
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    options: GenerationOptions,
    capabilities: Option<(Vec<ToolDescriptor>, Vec<ResourceMetadata>)>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("tools", &self.tools)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Banner for the first prompt: the pinned capability snapshot if one
    /// was given, else the live registries
    pub fn banner(&self) -> String {
        match &self.capabilities {
            Some((tools, resources)) => render_capabilities_banner(tools, resources),
            None => render_capabilities_banner(
                &self.tools.describe_all(),
                &self.resources.list_metadata(),
            ),
        }
    }

    /// Run the loop for up to `max_iterations` action rounds.
    pub async fn run(
        &self,
        prompt: &str,
        max_iterations: usize,
        history: &mut dyn TurnSink,
    ) -> Result<LoopOutcome> {
        if max_iterations < 1 {
            return Err(AgentError::InvalidArgument(format!(
                "iterations must be at least 1, got {max_iterations}"
            )));
        }

        let banner = self.banner();
        let mut current = if banner.is_empty() {
            prompt.to_string()
        } else {
            format!("{prompt}\n\n{banner}")
        };
        let mut tools_used = Vec::new();
        let mut resources_used = Vec::new();
        let mut generate_calls = 0;

        for iteration in 1..=max_iterations {
            tracing::debug!(iteration, max_iterations, "Awaiting model response");
            let response = self.provider.generate(&current, &self.options).await?;
            generate_calls += 1;

            let actions = parse_actions(&response);
            if actions.is_empty() {
                tracing::debug!(iteration, "No action requests, final answer");
                history.record(&Turn {
                    prompt: current,
                    response: response.clone(),
                    tool_used: tools_used.clone(),
                    resource_used: resources_used.clone(),
                })
                .await?;
                return Ok(LoopOutcome {
                    answer: response,
                    tools_used,
                    resources_used,
                    generate_calls,
                    budget_exhausted: false,
                });
            }

            tracing::info!(
                iteration,
                tools = actions.tools.len(),
                resources = actions.resources.len(),
                "Dispatching action requests"
            );
            let dispatch = self.dispatch(&actions).await;
            tools_used.extend(actions.tools);
            resources_used.extend(dispatch.resource_requests);

            history.record(&Turn {
                prompt: std::mem::take(&mut current),
                response,
                tool_used: tools_used.clone(),
                resource_used: resources_used.clone(),
            })
            .await?;

            current = render_followup_prompt(
                prompt,
                &dispatch.tool_results,
                &dispatch.resource_results,
            );
        }

        tracing::warn!(max_iterations, "Iteration budget exhausted, forcing a final answer");
        let answer = self.provider.generate(&current, &self.options).await?;
        generate_calls += 1;
        history.record(&Turn {
            prompt: current,
            response: answer.clone(),
            tool_used: tools_used.clone(),
            resource_used: resources_used.clone(),
        })
        .await?;

        Ok(LoopOutcome {
            answer,
            tools_used,
            resources_used,
            generate_calls,
            budget_exhausted: true,
        })
    }

    /// Execute every parsed request in order. Never fails.
    pub async fn dispatch(&self, actions: &ParsedActions) -> Dispatch {
        let mut dispatch = Dispatch::default();

        for request in &actions.tools {
            let result = self.tools.invoke(&request.name, &request.args).await;
            dispatch.tool_results.push(result);
        }

        let mut seen = HashSet::new();
        for request in &actions.resources {
            if !seen.insert(request.key()) {
                tracing::debug!(request = ?request.0, "Skipping duplicate resource request");
                continue;
            }
            let result = self.resources.resolve_request(request).await;
            dispatch.resource_results.push(result);
            dispatch.resource_requests.push(request.clone());
        }

        dispatch
    }
}

/// Builder for [`Agent`]
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Option<Arc<ToolRegistry>>,
    resources: Option<Arc<ResourceRegistry>>,
    options: GenerationOptions,
    capabilities: Option<(Vec<ToolDescriptor>, Vec<ResourceMetadata>)>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn resources(mut self, resources: Arc<ResourceRegistry>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Advertise this snapshot in the banner instead of the live registries
    pub fn capabilities(
        mut self,
        tools: Vec<ToolDescriptor>,
        resources: Vec<ResourceMetadata>,
    ) -> Self {
        self.capabilities = Some((tools, resources));
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let resources = match self.resources {
            Some(resources) => resources,
            None => Arc::new(ResourceRegistry::new()?),
        };
        Ok(Agent {
            provider,
            tools: self.tools.unwrap_or_default(),
            resources,
            options: self.options,
            capabilities: self.capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceSpec;
    use crate::tool::register_builtin_tools;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses, repeating the last one forever
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String>>>,
        last: Mutex<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new<I, S>(responses: I) -> Arc<Self>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self::with_results(responses.into_iter().map(|r| Ok(r.into())))
        }

        fn with_results(results: impl IntoIterator<Item = Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(results.into_iter().collect()),
                last: Mutex::new(String::new()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn prompt(&self, n: usize) -> String {
            self.prompts.lock().unwrap()[n].clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "script-1"
        }

        async fn complete(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => {
                    *self.last.lock().unwrap() = text.clone();
                    Ok(text)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        Arc::new(registry)
    }

    fn agent(provider: Arc<ScriptedProvider>) -> Agent {
        Agent::builder()
            .provider(provider)
            .tools(tools())
            .build()
            .unwrap()
    }

    const SUM_REQUEST: &str = "Tool Request(s):\n{\"name\":\"sum2num\",\"args\":{\"a\":2,\"b\":3}}";

    #[tokio::test]
    async fn test_plain_answer_terminates_after_one_call() {
        let provider = ScriptedProvider::new(["Paris is the capital of France."]);
        let agent = agent(Arc::clone(&provider));
        let mut turns = Vec::new();

        let outcome = agent.run("Capital of France?", 3, &mut turns).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.answer, "Paris is the capital of France.");
        assert!(outcome.tools_used.is_empty());
        assert!(outcome.resources_used.is_empty());
        assert!(!outcome.budget_exhausted);
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_forces_final_call() {
        let provider = ScriptedProvider::new([
            format!("first {SUM_REQUEST}"),
            format!("second {SUM_REQUEST}"),
            format!("third {SUM_REQUEST}"),
        ]);
        let agent = agent(Arc::clone(&provider));
        let mut turns = Vec::new();

        let outcome = agent.run("add", 2, &mut turns).await.unwrap();

        assert_eq!(provider.calls(), 3);
        assert_eq!(outcome.generate_calls, 3);
        assert_eq!(outcome.answer, format!("third {SUM_REQUEST}"));
        assert!(outcome.budget_exhausted);
        assert_eq!(turns.len(), 3);
        // the forced call reuses the last follow-up prompt
        assert_eq!(provider.prompt(2), provider.prompt(1));
    }

    #[tokio::test]
    async fn test_zero_iterations_rejected() {
        let provider = ScriptedProvider::new(["unused"]);
        let agent = agent(Arc::clone(&provider));
        let result = agent.run("hi", 0, &mut NoHistory).await;
        assert!(matches!(result, Err(AgentError::InvalidArgument(_))));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = ScriptedProvider::new([SUM_REQUEST, "2 + 3 = 5"]);
        let agent = agent(Arc::clone(&provider));
        let mut turns = Vec::new();

        let outcome = agent.run("What is 2+3?", 3, &mut turns).await.unwrap();

        assert_eq!(outcome.answer, "2 + 3 = 5");
        assert_eq!(outcome.tools_used.len(), 1);
        assert_eq!(outcome.tools_used[0].name, "sum2num");

        let followup = provider.prompt(1);
        assert!(followup.contains("\"func_results\": 5"));
        assert!(followup.ends_with("Original question: What is 2+3?"));

        // history is cumulative
        assert!(turns[0].tool_used.len() == 1 && turns[1].tool_used.len() == 1);
        assert!(turns[0].prompt.starts_with("What is 2+3?\n\nCapabilities banner"));
    }

    #[tokio::test]
    async fn test_sum2num_dispatch_shape() {
        let agent = agent(ScriptedProvider::new(["unused"]));
        let dispatch = agent.dispatch(&parse_actions(SUM_REQUEST)).await;
        assert_eq!(
            serde_json::to_value(&dispatch.tool_results).unwrap(),
            json!([{"func_name": "sum2num", "func_args": {"a": 2, "b": 3}, "func_results": 5}])
        );
    }

    #[tokio::test]
    async fn test_resource_dispatch_dedup() {
        let mut resources = ResourceRegistry::new().unwrap();
        resources.create(ResourceSpec::text("X", "x", "ex")).await.unwrap();
        resources.create(ResourceSpec::text("Y", "y", "why")).await.unwrap();
        let agent = Agent::builder()
            .provider(ScriptedProvider::new(["unused"]))
            .resources(Arc::new(resources))
            .build()
            .unwrap();

        let actions = ParsedActions {
            tools: Vec::new(),
            resources: [json!({"Name": "X", "ID": "1"}), json!({"Name": "X", "ID": "1"}), json!({"Name": "Y"})]
                .into_iter()
                .map(|v| ResourceRequest(v.as_object().cloned().unwrap()))
                .collect(),
        };
        let dispatch = agent.dispatch(&actions).await;
        assert_eq!(dispatch.resource_results.len(), 2);
        assert_eq!(dispatch.resource_results[0].content(), Some("ex"));
        assert_eq!(dispatch.resource_results[1].content(), Some("why"));
    }

    #[tokio::test]
    async fn test_invalid_resource_request_is_flagged() {
        let response = "Request Resource(s): {\"Title\": \"handbook\"}";
        let provider = ScriptedProvider::new([response, "I could not find it."]);
        let agent = agent(Arc::clone(&provider));

        let dispatch = agent.dispatch(&parse_actions(response)).await;
        assert_eq!(
            serde_json::to_value(&dispatch.resource_results).unwrap(),
            json!([{"error": "Invalid resource request format"}])
        );

        let outcome = agent.run("Read the handbook", 3, &mut NoHistory).await.unwrap();
        assert_eq!(outcome.resources_used.len(), 1);
        assert_eq!(outcome.resources_used[0].0.get("Title"), Some(&json!("handbook")));
        // only resolved content reaches the follow-up
        let followup = provider.prompt(1);
        assert!(followup.contains("Resource contents:\nNo resource content found."));
    }

    #[tokio::test]
    async fn test_marker_tool_without_args_defaults_but_standalone_is_ignored() {
        let response = "Tool Request(s): {\"name\": \"datetime\"}\nI might also want {\"name\": \"sum2num\"}";
        let provider = ScriptedProvider::new([response, "done"]);
        let agent = agent(Arc::clone(&provider));

        let outcome = agent.run("What time is it?", 3, &mut NoHistory).await.unwrap();

        assert_eq!(outcome.answer, "done");
        assert_eq!(outcome.tools_used.len(), 1);
        assert_eq!(outcome.tools_used[0].name, "datetime");
        assert!(outcome.tools_used[0].args.is_empty());
        let followup = provider.prompt(1);
        assert!(followup.contains("\"func_name\": \"datetime\""));
        assert!(!followup.contains("sum2num"));
    }

    #[tokio::test]
    async fn test_provider_error_aborts_loop() {
        let provider = ScriptedProvider::with_results([
            Ok(SUM_REQUEST.to_string()),
            Err(AgentError::Provider("rate limited".into())),
        ]);
        let agent = agent(Arc::clone(&provider));
        let mut turns = Vec::new();

        let err = agent.run("add", 3, &mut turns).await.unwrap_err();

        assert!(matches!(err, AgentError::Provider(msg) if msg == "rate limited"));
        // the successful first iteration stays recorded
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn test_no_banner_without_capabilities() {
        let provider = ScriptedProvider::new(["ok"]);
        let agent = Agent::builder()
            .provider(Arc::clone(&provider) as Arc<dyn LlmProvider>)
            .build()
            .unwrap();
        agent.run("just answer", 1, &mut NoHistory).await.unwrap();
        assert_eq!(provider.prompt(0), "just answer");
    }

    #[tokio::test]
    async fn test_pinned_capabilities_drive_banner() {
        let provider = ScriptedProvider::new(["ok"]);
        let agent = Agent::builder()
            .provider(Arc::clone(&provider) as Arc<dyn LlmProvider>)
            .tools(tools())
            .capabilities(Vec::new(), Vec::new())
            .build()
            .unwrap();
        assert_eq!(agent.banner(), "");
    }
}
