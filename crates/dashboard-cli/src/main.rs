//! Terminal front end for the dashboard API: streamed chat, model pulls,
//! status snapshots and app/model actions.

use std::io::Write as _;

use clap::{Parser, Subcommand};
use dashboard_stream::prelude::*;
use dashboard_stream::{CollaboratorClient, Message, PollerState, poll_once};
use tokio::io::{AsyncBufReadExt as _, BufReader};

#[derive(Parser)]
#[command(name = "dashboard", about = "Personal-server dashboard client")]
struct Cli {
    /// API base URL (overrides DASHBOARD_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat. Ctrl-C cancels the reply being streamed, or exits at
    /// the prompt.
    Chat {
        #[arg(long)]
        model: Option<String>,
        /// Optional system prompt sent ahead of every request.
        #[arg(long, conflicts_with = "server")]
        system: Option<String>,
        /// Ask about the server: it answers from its own live state and no
        /// history is sent.
        #[arg(long)]
        server: bool,
    },
    /// Download a model and follow its progress.
    Pull { model: String },
    /// Fetch service, resource and AI status once.
    Status,
    /// Install or remove an app.
    App {
        #[command(subcommand)]
        action: AppAction,
    },
    /// Delete or switch the active model.
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum AppAction {
    Install { name: String },
    Remove { name: String },
}

#[derive(Subcommand)]
enum ModelAction {
    Delete { name: String },
    Switch { name: String },
}

/// Conversation that echoes each flush to stdout as it lands.
struct TerminalChat {
    conversation: ConversationContext,
}

impl StreamTarget for TerminalChat {
    fn begin(&mut self) {
        self.conversation.begin_assistant();
    }

    fn apply(&mut self, payload: &str) {
        print!("{payload}");
        let _ = std::io::stdout().flush();
        self.conversation.append_assistant(payload);
    }

    fn fail(&mut self, notice: &str) {
        println!("\n[{notice}]");
        self.conversation.fail_assistant(notice);
    }

    fn settle(&mut self) {
        println!();
        self.conversation.settle_assistant();
    }
}

impl ChatTarget for TerminalChat {
    fn compose(&mut self, text: &str) -> Result<Vec<Message>, StreamError> {
        self.conversation.compose(text)
    }
}

/// Progress tracker that redraws the latest status line.
struct TerminalProgress {
    tracker: ProgressTracker,
}

impl StreamTarget for TerminalProgress {
    fn begin(&mut self) {
        self.tracker.begin();
    }

    fn apply(&mut self, payload: &str) {
        self.tracker.apply(payload);
        if let Some(line) = self.tracker.state().last_line.as_deref() {
            print!("\r\x1b[2K{line}");
            let _ = std::io::stdout().flush();
        }
    }

    fn fail(&mut self, notice: &str) {
        StreamTarget::fail(&mut self.tracker, notice);
    }

    fn settle(&mut self) {
        self.tracker.settle();
        println!();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    dashboard_stream::init_observability();

    let cli = Cli::parse();
    let mut config = DashboardConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config = config.base_url(url);
    }

    match cli.command {
        Command::Chat {
            model,
            system,
            server,
        } => chat(config, model, system, server).await?,
        Command::Pull { model } => pull(config, &model).await?,
        Command::Status => status(&config).await?,
        Command::App { action } => {
            let client = CollaboratorClient::new(&config)?;
            let reply = match action {
                AppAction::Install { name } => client.install_app(&name).await?,
                AppAction::Remove { name } => client.remove_app(&name).await?,
            };
            println!("{}", reply.message);
        }
        Command::Model { action } => {
            let client = CollaboratorClient::new(&config)?;
            let reply = match action {
                ModelAction::Delete { name } => client.delete_model(&name).await?,
                ModelAction::Switch { name } => client.switch_model(&name).await?,
            };
            println!("{}", reply.message);
        }
    }
    Ok(())
}

async fn chat(
    config: DashboardConfig,
    model: Option<String>,
    system: Option<String>,
    server: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = model.unwrap_or_else(|| config.default_model.clone());
    let coordinator = Coordinator::builder().config(config).build()?;
    let mut conversation = coordinator.conversation();
    if let Some(prompt) = system {
        conversation = conversation.system_prompt(prompt);
    }
    let mut terminal = TerminalChat { conversation };

    println!("Chatting with {model}. Ctrl-C stops a reply, Ctrl-D or Ctrl-C at the prompt exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let session = coordinator
            .open_session(TargetKey::Chat("terminal".into()))
            .await?;
        let abort = session.abort_handle();
        let run = async {
            if server {
                coordinator
                    .run_server_chat(session, &model, &mut terminal, &line)
                    .await
            } else {
                coordinator.run_chat(session, &model, &mut terminal, &line).await
            }
        };
        tokio::pin!(run);
        let report = tokio::select! {
            report = &mut run => report,
            _ = tokio::signal::ctrl_c() => {
                abort.abort();
                run.await
            }
        };
        match report.and_then(|report| report.outcome.into_result()) {
            Ok(()) => {}
            Err(err) if err.is_cancellation() => println!("[stopped]"),
            // Already shown inline by the terminal target.
            Err(StreamError::Transport(_)) => {}
            Err(err) => eprintln!("{}", err.user_notice().unwrap_or_else(|| err.to_string())),
        }
    }
    Ok(())
}

async fn pull(config: DashboardConfig, model: &str) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = Coordinator::builder().config(config).build()?;
    let mut progress = TerminalProgress {
        tracker: ProgressTracker::new(model),
    };

    let session = coordinator
        .open_session(TargetKey::Download(model.to_string()))
        .await?;
    let abort = session.abort_handle();
    let report = {
        let run = coordinator.run_pull(session, model, &mut progress);
        tokio::pin!(run);
        tokio::select! {
            report = &mut run => report,
            _ = tokio::signal::ctrl_c() => {
                abort.abort();
                run.await
            }
        }
    };

    let state = progress.tracker.into_state();
    match (&report.outcome, state.verdict()) {
        (SessionOutcome::Completed, PullVerdict::Succeeded) => println!("{model} ready"),
        (SessionOutcome::Completed, PullVerdict::Failed(message)) => {
            return Err(format!("pull failed: {message}").into());
        }
        (SessionOutcome::Completed, PullVerdict::Unknown) => {
            println!("{model}: {}", state.last_line.as_deref().unwrap_or("no status"));
        }
        (SessionOutcome::Cancelled, _) => println!("pull cancelled"),
        (SessionOutcome::Failed(err), _) => return Err(err.clone().into()),
    }
    Ok(())
}

async fn status(config: &DashboardConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = CollaboratorClient::new(config)?;
    let mut state = PollerState::default();
    poll_once(&client, &mut state).await;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
