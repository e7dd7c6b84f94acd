mod repl;
mod settings;
mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use quill_chat::{ChatSession, PlainTextRenderer, Presenter};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::repl::Repl;
use crate::settings::SettingsStore;

/// Terminal chat client with streamed answers and regeneration.
#[derive(Debug, Parser)]
#[command(name = "quill", version)]
struct Args {
    /// Settings file; defaults to the user config directory.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Agent id to use instead of the saved selection.
    #[arg(long, value_name = "ID")]
    agent: Option<String>,
    /// Model to use instead of the agent's configured one.
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,
    /// Print reasoning output under each answer.
    #[arg(long)]
    show_thoughts: bool,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never interleave with the transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let store = SettingsStore::new(
        args.config
            .clone()
            .unwrap_or_else(SettingsStore::default_config_path),
    );
    let settings = store.settings();
    tracing::info!(path = %store.config_path().display(), "settings loaded");

    let service = match settings.to_provider_config() {
        Some(config) => match quill_llm::create_service(config) {
            Ok(service) => Some(service),
            Err(error) => {
                tracing::warn!(error = %error, "chat service unavailable");
                eprintln!("! {error}");
                None
            }
        },
        None => {
            eprintln!(
                "! no API key configured; set api_key in {} or QUILL_API_KEY",
                store.config_path().display()
            );
            None
        }
    };

    let agent_id = args.agent.as_deref().unwrap_or(&settings.active_agent);
    let agent = match settings.agents.iter().find(|agent| agent.id == agent_id) {
        Some(agent) => Some(agent.to_profile()),
        None => {
            eprintln!("! unknown agent '{agent_id}'");
            None
        }
    };
    let agent = agent.map(|mut agent| {
        if let Some(model) = &args.model {
            agent.model_id = model.clone();
        }
        agent
    });

    let (view_tx, view_rx) = mpsc::unbounded_channel();
    let presenter = Presenter::spawn(Arc::new(PlainTextRenderer), Arc::new(view_tx));
    let mut session = ChatSession::new(presenter);
    session.set_service(service);
    session.set_agent(agent);
    session.new_conversation();

    let repl = Repl::new(session, view_rx, store, args.show_thoughts);
    if let Err(error) = repl.run().await {
        tracing::error!(error = %error, "terminal session ended with an error");
        eprintln!("! {error}");
        std::process::exit(1);
    }
}
