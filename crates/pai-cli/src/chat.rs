//! Interactive Chat
//!
//! Reads one line at a time and runs the agent loop on it against the
//! session's active instance. Slash commands switch the binding; a provider
//! or model switch starts a new session instance.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use pai_core::{
    Agent, GenerationOptions, ProviderRegistry, ResourceRegistry, SessionLog, SessionStore, ToolRegistry,
    session::SessionRecorder,
};

use crate::handlers::{self, Binding};
use crate::state::AppState;

/// Turns shown by a bare `/history`
const DEFAULT_HISTORY_TURNS: usize = 20;

const USAGE: &str = "Unknown command. Try: /model, /provider, /status, /history, /load";

/// One input line, classified
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Exit,
    Model(&'a str),
    Provider(&'a str),
    Status,
    History(usize),
    Load(&'a str),
    Unknown,
    Message(&'a str),
}

impl<'a> ChatCommand<'a> {
    /// `None` for a blank line
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Some(Self::Exit);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Message(line));
        };

        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, arg)| (name, arg.trim()));
        Some(match (name, arg) {
            ("model", m) if !m.is_empty() => Self::Model(m),
            ("provider", p) if !p.is_empty() => Self::Provider(p),
            ("status", _) => Self::Status,
            ("history", n) => Self::History(n.parse().unwrap_or(DEFAULT_HISTORY_TURNS)),
            ("load", s) if !s.is_empty() => Self::Load(s),
            _ => Self::Unknown,
        })
    }
}

/// A session open for chatting
pub struct ChatSession {
    providers: ProviderRegistry,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    sessions: SessionStore,
    options: GenerationOptions,
    iterations: usize,
    log: SessionLog,
    agent: Agent,
}

impl ChatSession {
    /// Open an existing session
    pub fn open(state: AppState, session: &str, iterations: usize, options: GenerationOptions) -> Result<Self> {
        if !state.sessions.exists(session) {
            bail!("Session '{session}' not found. Start it with 'pai init {session} <provider>'.");
        }
        let AppState {
            providers,
            tools,
            resources,
            sessions,
            ..
        } = state;
        let resources = Arc::new(resources);

        let log = sessions.load(session)?;
        let agent = handlers::session_agent(&providers, &tools, &resources, log.active()?, options.clone())?;
        Ok(Self {
            providers,
            tools,
            resources,
            sessions,
            options,
            iterations,
            log,
            agent,
        })
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Run the agent loop on one message, recording every turn
    pub async fn send(&mut self, text: &str) -> Result<String> {
        let mut recorder = SessionRecorder::new(&self.sessions, &mut self.log);
        let outcome = self.agent.run(text, self.iterations, &mut recorder).await?;
        Ok(outcome.answer)
    }

    /// Start a new instance bound to another provider or model.
    ///
    /// A model switch keeps the stored credential and endpoint; a provider
    /// switch falls back to the new provider's environment variable.
    pub fn switch(&mut self, provider: Option<&str>, model: Option<&str>) -> Result<()> {
        let active = self.log.active()?;
        let binding = match provider {
            Some(provider) => Binding {
                provider: provider.to_string(),
                model: model.map(str::to_string),
                ..Binding::default()
            },
            None => Binding {
                provider: active.provider.clone(),
                model: model.map(str::to_string),
                api_key: active.credential().map(str::to_string),
                base_url: active.base_url.clone(),
            },
        };

        let capabilities = (self.tools.describe_all(), self.resources.list_metadata());
        let name = self.log.session_name.clone();
        let log = handlers::start_instance(&self.providers, &self.sessions, capabilities, &name, binding)?;
        self.agent = self.agent_for(&log)?;
        self.log = log;
        Ok(())
    }

    /// Continue another saved session instead
    pub fn load(&mut self, session: &str) -> Result<()> {
        let log = self.sessions.load(session)?;
        self.agent = self.agent_for(&log)?;
        self.log = log;
        Ok(())
    }

    fn agent_for(&self, log: &SessionLog) -> Result<Agent> {
        Ok(handlers::session_agent(
            &self.providers,
            &self.tools,
            &self.resources,
            log.active()?,
            self.options.clone(),
        )?)
    }

    pub fn status(&self) -> Result<String> {
        let active = self.log.active()?;
        Ok(format!(
            "Session: {} | Provider: {} | Model: {} | Instance: {}",
            self.log.session_name,
            active.provider,
            active.model,
            self.log.session_instance.len()
        ))
    }

    /// The last `n` turns of the active instance
    pub fn history(&self, n: usize) -> Result<String> {
        let turns = &self.log.active()?.prompt_history;
        if turns.is_empty() {
            return Ok("No history yet.".into());
        }
        let skip = turns.len().saturating_sub(n);
        let lines: Vec<String> = turns
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, turn)| format!("[{}] you> {}\n[{}] assistant> {}", i + 1, turn.prompt, i + 1, turn.response))
            .collect();
        Ok(lines.join("\n"))
    }

    /// Handle one classified line; `false` ends the chat
    async fn handle(&mut self, command: ChatCommand<'_>, out: &mut impl Write) -> Result<bool> {
        match command {
            ChatCommand::Exit => return Ok(false),
            ChatCommand::Message(text) => {
                let answer = self.send(text).await?;
                writeln!(out, "assistant> {answer}")?;
            }
            ChatCommand::Model(model) => {
                self.switch(None, Some(model))?;
                writeln!(out, "(model set to {})", self.log.active()?.model)?;
            }
            ChatCommand::Provider(provider) => {
                self.switch(Some(provider), None)?;
                let active = self.log.active()?;
                writeln!(out, "(provider set to {}, model {})", active.provider, active.model)?;
            }
            ChatCommand::Status => writeln!(out, "{}", self.status()?)?,
            ChatCommand::History(n) => writeln!(out, "{}", self.history(n)?)?,
            ChatCommand::Load(session) => {
                self.load(session)?;
                let active = self.log.active()?;
                writeln!(
                    out,
                    "(loaded session {session}; provider={}, model={})",
                    active.provider, active.model
                )?;
            }
            ChatCommand::Unknown => writeln!(out, "{USAGE}")?,
        }
        Ok(true)
    }
}

/// Chat until `exit`, `quit` or end of input. Failures are printed and the
/// loop continues.
pub async fn run<R>(chat: &mut ChatSession, input: R, out: &mut impl Write) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    writeln!(out, "Type your messages. Ctrl-D or type \"exit\" to quit.")?;
    writeln!(out, "{}", chat.status()?)?;

    let mut lines = input.lines();
    loop {
        write!(out, "you> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let Some(command) = ChatCommand::parse(&line) else {
            continue;
        };
        match chat.handle(command, &mut *out).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                tracing::debug!(error = ?err, "Chat command failed");
                writeln!(out, "Error: {}", handlers::describe(&err))?;
            }
        }
    }
    writeln!(out, "Bye.")?;
    Ok(())
}

/// `pai chat` on the terminal
pub async fn chat(state: AppState, session: &str, iterations: usize, params: &[String]) -> Result<()> {
    let options = GenerationOptions::from_params(params)?;
    let mut chat = ChatSession::open(state, session, iterations, options)?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    run(&mut chat, stdin, &mut std::io::stdout()).await
}
