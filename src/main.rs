//! connect-agent entry point

use clap::{Parser, Subcommand};
use connect_agent::agent::{last_status, Connect};
use connect_agent::config::{AgentConfig, FileConfigSource};
use connect_agent::device::SimulatedDevice;
use connect_agent::error::{AgentError, AgentResult};
use connect_agent::lifecycle_span;
use connect_agent::observability::logging::{
    init_logging, parse_level, parse_spans_flag, LogFormat,
};
use connect_agent::observability::metrics;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, Level};

const DEFAULT_CONFIG_PATHS: &[&str] = &["connect.toml", "config/connect.toml"];

/// Device-side control channel to the print farm server
#[derive(Parser)]
#[command(name = "connect-agent")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CONNECT_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace) unless LOG_LEVEL is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control channel until interrupted
    Run,
    /// Validate the configuration
    Config {
        /// Print the configuration with secrets hidden
        #[arg(long)]
        show: bool,
    },
}

fn init_cli_logging(verbose: u8) {
    let level = match (env::var("LOG_LEVEL"), verbose) {
        (Ok(level), _) => parse_level(&level),
        (Err(_), 0) => Level::INFO,
        (Err(_), 1) => Level::DEBUG,
        (Err(_), _) => Level::TRACE,
    };
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = parse_spans_flag(&env::var("LOG_SPANS").unwrap_or_default());
    init_logging(level, format, include_spans);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_cli_logging(cli.verbose);

    let (path, config) = match load_configuration(cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e.redacted());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(path, config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.redacted());
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<PathBuf>) -> AgentResult<(PathBuf, AgentConfig)> {
    let path = match config_path {
        Some(path) => path,
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or_else(|| {
                AgentError::internal(
                    "No configuration file found. Provide one with -c/--config or create connect.toml",
                )
            })?,
    };

    info!("Loading configuration from: {}", path.display());
    let config = AgentConfig::load_from_file(&path)?;
    Ok((path, config))
}

async fn run_agent(path: PathBuf, config: AgentConfig) -> AgentResult<()> {
    let startup = lifecycle_span!(event = "startup");
    let printer_info = startup.in_scope(|| {
        info!(
            "Starting connect-agent v{} for {}",
            env!("CARGO_PKG_VERSION"),
            config.printer.printer_type
        );
        config.printer.to_printer_info()
    })?;

    let device = Arc::new(SimulatedDevice::new(printer_info));
    let mut connect = Connect::new(FileConfigSource::new(path), device, &config.timing);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = connect.run() => {}
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    let _shutdown = lifecycle_span!(event = "shutdown").entered();
    match serde_json::to_string(&metrics().snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final status {}", last_status()),
        Err(e) => error!("Unable to serialize metrics: {}", e),
    }
    Ok(())
}

fn handle_config_command(config: &AgentConfig, show: bool) -> AgentResult<()> {
    info!("Configuration is valid");
    if show {
        println!("{}", config.to_redacted_toml()?);
    }
    Ok(())
}
