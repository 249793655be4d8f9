//! # pai-core
//!
//! Provider-agnostic LLM session layer with a text-protocol agent loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │ Agent Loop  │──│ Tool / Res.  │  │   LlmProvider       │  │
//! │  │ (reasoning) │  │  Registries  │  │   (Strategy)        │  │
//! │  └─────┬───────┘  └──────────────┘  └──────────▲──────────┘  │
//! │        │ context + action parsing              │             │
//! │        ▼                                       │             │
//! │  ┌─────────────┐                    ┌──────────┴──────────┐  │
//! │  │  Session    │                    │  ProviderRegistry   │  │
//! │  │  Store      │                    │  (name → factory)   │  │
//! │  └─────────────┘                    └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Vendor adapters live in `pai-runtime`; this crate only knows the
//! [`LlmProvider`] trait and the factories registered against it.

pub mod action;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod registry;
pub mod resource;
pub mod session;
pub mod tool;

pub use error::{AgentError, Result};
pub use message::{Message, Role};
pub use provider::{GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder, LoopOutcome, Turn, TurnSink};
pub use registry::{ProviderArgs, ProviderFactory, ProviderRegistry};
pub use resource::{ResourceEntry, ResourceRegistry, ResourceRequest};
pub use session::{SessionInstance, SessionLog, SessionStore};
pub use tool::{Tool, ToolCallRequest, ToolCallResult, ToolRegistry};
