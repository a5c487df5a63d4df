//! Switchboard CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use switchboard::config::RuntimeConfig;
use switchboard::llm::ProviderCredentials;
use switchboard::scheduler::{Scheduler, TokioCronEngine, brain_event_handler};
use switchboard::{Brain, ContextManager, JsonlHistoryStore, MemoryStore, Router, Tokenizer};
use tokio::io::AsyncBufReadExt as _;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Channel id used for the interactive stdin session.
const CLI_CHANNEL: &str = "cli";

#[derive(Parser)]
#[command(name = "switchboard", version)]
#[command(about = "Local-first agent runtime with multi-channel routing")]
struct Cli {
    /// Path to a TOML config file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for history and memory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let fmt_layer = tracing_subscriber::fmt::layer().compact();
    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config from {}", path.display()))
}

/// Provider API keys come from the environment; the config file only names
/// provider kinds and models.
fn credentials_for(kind: &str) -> ProviderCredentials {
    let env_key = match kind {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        _ => None,
    };
    let api_keys = env_key
        .and_then(|name| std::env::var(name).ok())
        .map(|keys| {
            keys.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    ProviderCredentials {
        api_keys,
        base_url: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = load_config(cli.config.as_deref())?;

    let tokenizer = Arc::new(
        Tokenizer::new(&config.tokenizer.encoding).context("failed to build tokenizer")?,
    );
    let context_manager = ContextManager::new(tokenizer, config.context.window_tokens);

    let memory_root = config
        .brain
        .memory_path
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("memory"));
    let memory = Arc::new(MemoryStore::new(memory_root));

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .context("failed to build HTTP client")?;
    let providers =
        switchboard::llm::build_provider_chain(&config.brain, credentials_for, http_client)
            .context("failed to build provider chain")?;

    let brain = Arc::new(
        Brain::builder()
            .providers(providers)
            .memory(memory)
            .context_manager(context_manager)
            .build()
            .context("failed to build brain")?,
    );

    let router = Arc::new(
        Router::builder(brain.clone())
            .history_factory(JsonlHistoryStore::factory(cli.data_dir.join("history")))
            .build(),
    );

    let cancel = CancellationToken::new();

    let scheduler = Scheduler::new(
        Arc::new(TokioCronEngine::new()),
        brain_event_handler(brain.clone(), cancel.clone()),
    );
    scheduler.preload(&config.scheduler.jobs).await;
    scheduler.start();

    tracing::info!(
        provider = %config.brain.provider_kind,
        fallbacks = config.brain.fallbacks.len(),
        jobs = scheduler.list_jobs().await.len(),
        "switchboard ready, reading prompts from stdin"
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        let prompt = line.trim();
                        if prompt.is_empty() {
                            continue;
                        }
                        match router.route(&cancel, CLI_CHANNEL, prompt).await {
                            Ok(reply) => println!("{reply}"),
                            Err(error) => tracing::error!(%error, "failed to handle prompt"),
                        }
                    }
                    None => break,
                }
            }
        }
    }

    cancel.cancel();
    scheduler.stop();
    Ok(())
}
