//! pai: Personal AI Interface
//!
//! Initialize a session once, then prompt it many times. Each prompt runs
//! the agent loop against the session's provider, with the built-in tools
//! and the registered resources on offer.

mod chat;
mod handlers;
mod state;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pai_core::{config::PaiPaths, reasoning::DEFAULT_MAX_ITERATIONS, resource::ResourceSpec};

use crate::handlers::{Binding, DEFAULT_TEST_PROMPT, PromptRequest};
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "pai")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Personal AI Interface: initialize once, prompt many times", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session (or a new instance of one) bound to a provider
    Init {
        /// Session name
        session: String,
        /// Provider name or alias
        provider: String,
        /// Model (defaults to the provider's default)
        #[arg(short, long)]
        model: Option<String>,
        /// API key to store encrypted in the session (else the provider's env var is used)
        #[arg(long)]
        api_key: Option<String>,
        /// Endpoint override for proxies and self-hosted gateways
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Send a prompt through the agent loop of a session
    Prompt {
        /// Session name
        session: String,
        /// Prompt text (read from stdin when omitted)
        text: Option<String>,
        /// Read the prompt text from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Maximum action rounds before a final answer is forced
        #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        iterations: usize,
        /// Generation parameter, e.g. temperature=0.2 (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Print the reply with its session binding as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chat with a session interactively, one agent run per line
    Chat {
        session: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        iterations: usize,
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// List or delete saved sessions
    #[command(subcommand)]
    Sessions(SessionCommands),

    /// Show the resolved provider/model and saved sessions
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Send a test prompt to the resolved provider/model (no session)
    Test {
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        /// Test prompt to send
        #[arg(short = 'q', long, default_value = DEFAULT_TEST_PROMPT)]
        prompt: String,
    },

    /// Manage providers
    #[command(subcommand)]
    Providers(ProviderCommands),

    /// List models offered by a provider
    Models {
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        /// Case-insensitive substring filter
        #[arg(short, long)]
        grep: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Manage resources the model may request
    #[command(subcommand)]
    Resources(ResourceCommands),

    /// Inspect the built-in tools
    #[command(subcommand)]
    Tools(ToolCommands),

    /// Show the prompt history of a session's active instance
    History {
        session: String,
        /// Only the last N turns
        #[arg(long)]
        last: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Default provider/model settings (no secrets stored)
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum SessionCommands {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete a session file with all its instances
    Delete {
        session: String,
    },
}

#[derive(Subcommand)]
enum ProviderCommands {
    /// List providers
    List {
        /// Show every field
        #[arg(short, long)]
        verbose: bool,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Map a provider name to an implementation class
    Add {
        name: String,
        class_path: String,
        /// Comma-separated aliases
        #[arg(long)]
        aliases: Option<String>,
        /// Add the provider disabled
        #[arg(long)]
        disabled: bool,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
    /// Remove a provider added with `providers add`
    Remove {
        name: String,
    },
    /// Set the default provider
    Default {
        name: String,
    },
    AddAlias {
        provider: String,
        alias: String,
    },
    RemoveAlias {
        alias: String,
    },
}

#[derive(Subcommand)]
enum ResourceCommands {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print a resource with its content resolved
    Show {
        name_or_id: String,
    },
    Add(ResourceArgs),
    /// Replace a resource's content, keeping its ID
    Update(ResourceArgs),
    Remove {
        name_or_id: String,
    },
}

#[derive(Args)]
struct ResourceArgs {
    name: String,
    /// Text, a file path (`--content-type file`) or a URL (`--content-type url`)
    content: String,
    #[arg(short, long, default_value = "")]
    description: String,
    /// string, file or url
    #[arg(short = 't', long)]
    content_type: Option<String>,
    /// Read CONTENT as a local path once and store the text
    #[arg(long)]
    local_file: bool,
    #[arg(long)]
    filetype: Option<String>,
    /// Comma-separated tags
    #[arg(long)]
    tags: Option<String>,
}

impl ResourceArgs {
    fn into_spec(self, default_type: Option<&str>) -> ResourceSpec {
        let tags = handlers::split_list(self.tags.as_deref());
        ResourceSpec {
            name: self.name,
            description: self.description,
            content: self.content,
            content_type: self.content_type.or_else(|| default_type.map(str::to_string)),
            local_file: self.local_file,
            filetype: self.filetype,
            tags: (!tags.is_empty()).then_some(tags),
        }
    }
}

#[derive(Subcommand)]
enum ToolCommands {
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    Show,
    Set {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load environment before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    // stdout carries command output only
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "Command failed");
            eprintln!("Error: {}", handlers::describe(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let mut state = AppState::load(PaiPaths::from_env()?)?;

    match command {
        Commands::Init { session, provider, model, api_key, base_url } => handlers::init(
            &state,
            &session,
            Binding {
                provider,
                model,
                api_key,
                base_url,
            },
        ),
        Commands::Prompt { session, text, file, iterations, params, json } => {
            let request = PromptRequest {
                session,
                text,
                file,
                iterations,
                params,
                json,
            };
            handlers::prompt(state, request).await
        }
        Commands::Chat { session, iterations, params } => chat::chat(state, &session, iterations, &params).await,
        Commands::Sessions(cmd) => match cmd {
            SessionCommands::List { json } => handlers::sessions_list(&state, json),
            SessionCommands::Delete { session } => handlers::sessions_delete(&state, &session),
        },
        Commands::Status { json } => handlers::status(&state, json),
        Commands::Test { provider, model, base_url, prompt } => {
            handlers::test(&state, provider.as_deref(), model.as_deref(), base_url, &prompt).await
        }
        Commands::Models { provider, base_url, grep, json } => {
            handlers::models(&state, provider.as_deref(), base_url, grep.as_deref(), json).await
        }
        Commands::History { session, last, json } => handlers::history(&state, &session, last, json),
        Commands::Providers(cmd) => match cmd {
            ProviderCommands::List { verbose, json } => handlers::providers_list(&state, verbose, json),
            ProviderCommands::Add { name, class_path, aliases, disabled } => {
                handlers::providers_add(&mut state, &name, &class_path, aliases.as_deref(), disabled)
            }
            ProviderCommands::Enable { name } => handlers::providers_enable(&mut state, &name),
            ProviderCommands::Disable { name } => handlers::providers_disable(&mut state, &name),
            ProviderCommands::Remove { name } => handlers::providers_remove(&mut state, &name),
            ProviderCommands::Default { name } => handlers::providers_default(&mut state, &name),
            ProviderCommands::AddAlias { provider, alias } => {
                handlers::providers_add_alias(&mut state, &provider, &alias)
            }
            ProviderCommands::RemoveAlias { alias } => handlers::providers_remove_alias(&mut state, &alias),
        },
        Commands::Resources(cmd) => match cmd {
            ResourceCommands::List { json } => handlers::resources_list(&state, json),
            ResourceCommands::Show { name_or_id } => handlers::resources_show(&state, &name_or_id).await,
            ResourceCommands::Add(args) => {
                handlers::resources_add(&mut state, args.into_spec(Some("string"))).await
            }
            // an unset type keeps the stored one
            ResourceCommands::Update(args) => handlers::resources_update(&mut state, args.into_spec(None)).await,
            ResourceCommands::Remove { name_or_id } => handlers::resources_remove(&mut state, &name_or_id),
        },
        Commands::Tools(ToolCommands::List { json }) => handlers::tools_list(&state, json),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => {
                handlers::config_show(&state);
                Ok(())
            }
            ConfigCommands::Set { provider, model } => {
                handlers::config_set(&mut state, provider.as_deref(), model.as_deref())
            }
        },
    }
}
