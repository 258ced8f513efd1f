use anyhow::{Context, Result};
use clap::Parser;
use nschat::models::chat::Chat;
use nschat::orchestrator::Orchestrator;
use nschat::persist::load_chat;
use nschat::providers::openrouter::OpenRouterProvider;
use nschat::tools::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod configuration;
mod error;
mod session;

use configuration::Settings;
use session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.config/nschat/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to use, overriding the configured one
    #[arg(short, long)]
    model: Option<String>,

    /// Resume a saved conversation
    #[arg(short, long)]
    load: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let config = settings.orchestrator_config(cli.model.as_deref());

    let chat = match &cli.load {
        Some(path) => load_chat(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Chat::default(),
    };

    let provider = OpenRouterProvider::new(settings.provider.into_config()?)?;
    let orchestrator = Orchestrator::with_chat(
        config,
        Arc::new(provider),
        ToolRegistry::builtin()?,
        Arc::new(settings.kernel.into_config()),
        chat,
    )?;

    Session::new(orchestrator).start().await
}
