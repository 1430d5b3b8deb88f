//! taibai-listen - tail a Taibai event hub
//!
//! Connects with the given config, subscribes to the requested topics and
//! logs every event until interrupted.

use std::path::PathBuf;

use clap::Parser;
use directories::ProjectDirs;
use taibai_core::{ClientConfig, ConfigError};
use taibai_net::HubClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod handlers;

const CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Parser)]
#[command(name = "taibai-listen")]
#[command(about = "Stream events from a Taibai hub to the log")]
struct Args {
    /// Config file; defaults to client.toml in the user config directory
    #[arg(long, env = "TAIBAI_CONFIG")]
    config: Option<PathBuf>,

    /// Hub websocket URL, overrides the config file
    #[arg(long)]
    url: Option<String>,

    /// Bearer token, overrides the config file
    #[arg(long)]
    token: Option<String>,

    /// Topic to subscribe to (repeatable)
    #[arg(long = "topic", value_name = "TOPIC")]
    topics: Vec<String>,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> taibai_net::Result<()> {
    let config = resolve_config(&args)?;
    let client = HubClient::new(config)?;
    tracing::info!(client_id = %client.id(), url = %client.config().url, "Starting listener");

    handlers::install(&client);

    client.connect().await?;
    for topic in &args.topics {
        client.subscribe(topic)?;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to wait for Ctrl-C: {}", e);
    }
    tracing::info!("Shutting down");
    client.disconnect().await;
    Ok(())
}

/// Config file (if any), then environment, then command line
fn resolve_config(args: &Args) -> Result<ClientConfig, ConfigError> {
    let path = args.config.clone().or_else(default_config_path);
    let config = match path {
        Some(path) if path.exists() => ClientConfig::load(&path)?,
        Some(path) if args.config.is_some() => {
            return Err(ConfigError::Invalid(format!(
                "config file not found: {}",
                path.display()
            )))
        }
        _ => ClientConfig::new("", ""),
    };

    let mut config = config.with_env_overrides();
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(token) = &args.token {
        config.token = token.clone();
    }
    config.validate()?;
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "taibai", "taibai").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
