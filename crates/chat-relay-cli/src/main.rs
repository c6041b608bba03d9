use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use chat_relay_core::config::Config;
use chat_relay_gateway::{AppState, start_gateway};
use chat_relay_stream::MetricsTelemetry;

mod ask;
mod logging;

#[derive(Parser)]
#[command(
    name = "chat-relay",
    about = "Streaming relay between a browser chat UI and an agent engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (default: 3030)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send one message to a running relay and print the streamed answer
    Ask {
        /// Message to send
        #[arg(short, long)]
        message: String,

        /// Use the research endpoint
        #[arg(long)]
        research: bool,

        /// Model override (must be selectable on the endpoint)
        #[arg(long)]
        model: Option<String>,

        /// Relay base URL (default: http://127.0.0.1:<configured port>)
        #[arg(long)]
        url: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.port());
            serve(config, port).await?;
        }
        Commands::Ask {
            message,
            research,
            model,
            url,
        } => {
            let url = url.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.port()));
            ask::run(&url, &message, research, model.as_deref()).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("Config key not set: {key}"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid config: {}", errors.join("; "));
    }

    let engine = chat_relay_engine::build_engine(&config)?;
    tracing::info!(engine = engine.id(), "Starting Chat Relay on port {port}");

    let state = AppState::new(Arc::new(config), engine, Arc::new(MetricsTelemetry));

    #[cfg(feature = "metrics")]
    let state = match chat_relay_gateway::metrics::install_prometheus_recorder() {
        Ok(handle) => state.with_metrics_handle(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics endpoint disabled");
            state
        }
    };

    start_gateway(Arc::new(state), port).await
}
