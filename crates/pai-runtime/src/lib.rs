//! # pai-runtime
//!
//! Vendor adapters for pai-core.
//!
//! ## Providers
//!
//! - **OpenAI**: Chat Completions API
//! - **Anthropic**: Messages API
//! - **Gemini** (alias `google`): generateContent API
//! - **Hugging Face** (alias `hf`): Inference API text generation
//! - **Ollama** (feature `ollama`, on by default): local inference via `ollama-rs`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pai_core::{ProviderArgs, ProviderRegistry};
//!
//! let mut registry = ProviderRegistry::load(paths.providers_file())?;
//! pai_runtime::register_builtin_providers(&mut registry);
//! let provider = registry.create("openai", ProviderArgs::default().with_model("gpt-4o"))?;
//! let text = provider.generate("Hello", &GenerationOptions::default()).await?;
//! ```

mod http;

pub mod anthropic;
pub mod gemini;
pub mod huggingface;
pub mod openai;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use huggingface::HuggingFaceProvider;
#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use pai_core::ProviderRegistry;

/// Register every adapter compiled into this crate
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register("openai", openai::CLASS_PATH, OpenAiProvider::factory(), &[]);
    registry.register("anthropic", anthropic::CLASS_PATH, AnthropicProvider::factory(), &[]);
    registry.register("gemini", gemini::CLASS_PATH, GeminiProvider::factory(), &["google"]);
    registry.register(
        "huggingface",
        huggingface::CLASS_PATH,
        HuggingFaceProvider::factory(),
        &["hf"],
    );
    #[cfg(feature = "ollama")]
    registry.register("ollama", ollama::CLASS_PATH, OllamaProvider::factory(), &[]);
}
