mod terminal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use rusty_interp_agent::{Agent, AgentSettings, AutoApprove, Confirmer, RespondOutcome};
use rusty_interp_backends::{BackendRegistry, BackendSettings, DefaultBackendFactory};
use rusty_interp_core::config::{Config, LoggingConfig};
use rusty_interp_providers::openai::OpenAiProvider;
use rusty_interp_providers::{Credentials, LlmProvider};

use crate::terminal::{TerminalConfirmer, TerminalDisplay};

#[derive(Parser)]
#[command(
    name = "rusty-interp",
    about = "Chat with a model that writes and runs code on your machine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run code without asking for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Use a local OpenAI-compatible server (Ollama)
    #[arg(long)]
    local: bool,

    /// Dump prompts and backend traffic
    #[arg(short, long)]
    debug: bool,

    /// Model to use
    #[arg(long)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
    /// Get a config value by dotted path
    Get { key: String },
    /// Set a config value by dotted path
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let mut config = Config::load(&config_path)?;
    apply_overrides(&mut config, &cli);

    init_logging(&config.logging(), cli.verbose || config.debug())?;

    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }

    match cli.command {
        Some(Commands::Config { action }) => run_config(action, config, &config_path),
        None => run_chat(config).await,
    }
}

/// CLI flags win over file values.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    let agent = config.agent_mut();
    if cli.yes {
        agent.auto_run = true;
    }
    if cli.local {
        agent.local = true;
    }
    if cli.debug {
        agent.debug = true;
    }
    if let Some(model) = &cli.model {
        agent.model = Some(model.clone());
    }
}

fn build_filter(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = match (&logging.level, verbose) {
        (_, true) => "debug",
        (Some(level), false) => level.as_str(),
        (None, false) => "warn",
    };
    let mut filter = EnvFilter::new(level);
    for directive in &logging.filters {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid log filter '{directive}': {e}"))?,
        );
    }
    Ok(filter)
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = build_filter(logging, verbose)?;
    let writer = if logging.output == "stdout" {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
    Ok(())
}

fn run_config(action: ConfigAction, mut config: Config, path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Get { key } => match config.get_path(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => anyhow::bail!("No value at '{key}'"),
        },
        ConfigAction::Set { key, value } => {
            // Accept JSON literals; anything else is stored as a string.
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            config.set_path(&key, value)?;
            config.save(path)?;
            println!("Updated {key} in {}", path.display());
        }
    }
    Ok(())
}

fn select_provider(config: &Config) -> anyhow::Result<(Arc<dyn LlmProvider>, Credentials)> {
    let provider = config.provider();
    let base_url = provider.base_url.as_deref();

    if config.local() || provider.id.as_deref() == Some("ollama") {
        let credentials = match provider.resolve_api_key() {
            Some(api_key) if !config.local() => Credentials::ApiKey { api_key },
            _ => Credentials::NoAuth,
        };
        return Ok((Arc::new(OpenAiProvider::ollama(base_url)), credentials));
    }

    let Some(api_key) = provider.resolve_api_key() else {
        anyhow::bail!(
            "No API key found. Set {} or provider.api_key in {}",
            provider.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY"),
            Config::config_path().display()
        );
    };
    Ok((
        Arc::new(OpenAiProvider::openai(base_url)),
        Credentials::ApiKey { api_key },
    ))
}

async fn read_line() -> anyhow::Result<String> {
    let line = tokio::task::spawn_blocking(|| {
        dialoguer::Input::<String>::new()
            .with_prompt(">")
            .allow_empty(true)
            .interact_text()
    })
    .await??;
    Ok(line)
}

async fn run_chat(config: Config) -> anyhow::Result<()> {
    let (provider, credentials) = select_provider(&config)?;
    let confirmer: Arc<dyn Confirmer> = if config.auto_run() {
        Arc::new(AutoApprove)
    } else {
        Arc::new(TerminalConfirmer)
    };
    let registry = BackendRegistry::new(Arc::new(DefaultBackendFactory::new(
        BackendSettings::from_config(&config),
    )))
    .with_debug(config.debug());

    let mut agent = Agent::new(
        AgentSettings::from_config(&config),
        provider,
        credentials,
        Arc::new(TerminalDisplay),
        confirmer,
        registry,
    );

    println!(
        "Rusty Interpreter v{} ({}){}",
        env!("CARGO_PKG_VERSION"),
        config.model(),
        if config.auto_run() { ", auto-run on" } else { "" }
    );
    println!("Type 'exit' to quit, '%reset' to start over. Ctrl-C interrupts a response.\n");

    loop {
        let input = match read_line().await {
            Ok(input) => input,
            Err(e) => {
                tracing::debug!(%e, "Input closed");
                break;
            }
        };
        let input = input.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "%reset" => {
                agent.reset();
                println!("Conversation reset.\n");
                continue;
            }
            _ => {}
        }

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = agent.chat_turn(input, &cancel).await;
        watcher.abort();

        match result {
            Ok(RespondOutcome::Completed) | Ok(RespondOutcome::Declined) => {}
            Ok(RespondOutcome::Interrupted) => println!("\n(interrupted)\n"),
            Ok(RespondOutcome::IterationLimit) => {
                println!("\n(stopped: too many code runs in one turn; send a message to continue)\n")
            }
            Err(e) => {
                tracing::error!(%e, "Response failed");
                eprintln!("Error: {e}\n");
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}
