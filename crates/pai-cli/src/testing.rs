//! Test fixtures shared by the command tests

use std::sync::Arc;

use async_trait::async_trait;
use pai_core::{GenerationOptions, LlmProvider, ProviderArgs, config::PaiPaths};

use crate::state::AppState;

/// Asks for `sum2num` until the follow-up carries a result
pub struct AddingProvider {
    model: String,
}

#[async_trait]
impl LlmProvider for AddingProvider {
    fn name(&self) -> &str {
        "adding"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, _options: &GenerationOptions) -> pai_core::Result<String> {
        if prompt.contains("Original question:") {
            Ok("The sum is 5.".into())
        } else {
            Ok("Tool Request(s):\n{\"name\": \"sum2num\", \"args\": {\"a\": 2, \"b\": 3}}".into())
        }
    }
}

fn adding(args: ProviderArgs) -> pai_core::Result<Box<dyn LlmProvider>> {
    Ok(Box::new(AddingProvider {
        model: args.model.unwrap_or_else(|| "adder-1".into()),
    }))
}

/// State over `dir` with the fake registered as `adding` and `summing`
pub fn state(dir: &tempfile::TempDir) -> AppState {
    let mut state = AppState::load(PaiPaths::new(dir.path())).unwrap();
    state
        .providers
        .register("adding", "testing::AddingProvider", Arc::new(adding), &[]);
    state
        .providers
        .register("summing", "testing::SummingProvider", Arc::new(adding), &[]);
    state
}
