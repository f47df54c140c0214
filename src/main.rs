//! CLI entry point for phyphox-sync
//!
//! Mirrors a phyphox experiment from the command line.
//!
//! # Usage
//!
//! Watch the configured buffers, starting the remote experiment first:
//! ```bash
//! phyphox-sync --config config/phyphox_sync.toml watch --start
//! ```
//!
//! One-shot commands:
//! ```bash
//! phyphox-sync --host 192.168.0.42 stop
//! phyphox-sync --host 192.168.0.42 set frequency 440
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phyphox_sync::config::{SyncConfig, DEFAULT_CONFIG_PATH};
use phyphox_sync::connection::{Connection, ConnectionSettings};
use phyphox_sync::data::Buffer;
use phyphox_sync::experiment::Experiment;
use phyphox_sync::logging::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "phyphox-sync")]
#[command(about = "Mirror and control a phyphox experiment over remote access", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Device host, overrides the configuration
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device port, overrides the configuration
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured buffers and log every update until Ctrl-C
    Watch {
        /// Start the remote experiment before polling
        #[arg(long)]
        start: bool,
    },
    /// Start the remote experiment
    Start,
    /// Stop the remote experiment
    Stop,
    /// Delete the remote experiment's data
    Clear,
    /// Write a value into a remote input buffer
    Set {
        /// Buffer name
        buffer: String,
        /// Value to write
        value: f64,
    },
    /// Trigger a remote experiment element
    Trigger {
        /// Element id
        element: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Watch { start } => watch(&cli, *start).await,
        Commands::Start => {
            let connection = connect(&cli)?;
            connection.start_experiment().await?;
            info!("Experiment started");
            Ok(())
        }
        Commands::Stop => {
            let connection = connect(&cli)?;
            connection.stop_experiment().await?;
            info!("Experiment stopped");
            Ok(())
        }
        Commands::Clear => {
            let connection = connect(&cli)?;
            connection.clear_data().await?;
            info!("Experiment data cleared");
            Ok(())
        }
        Commands::Set { buffer, value } => {
            let connection = connect(&cli)?;
            connection.set_buffer_value(buffer, *value).await?;
            info!(%buffer, value, "Buffer value set");
            Ok(())
        }
        Commands::Trigger { element } => {
            let connection = connect(&cli)?;
            connection.trigger_element(element).await?;
            info!(%element, "Element triggered");
            Ok(())
        }
    }
}

/// Load and validate the configuration file with the command line overrides applied.
fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = SyncConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    config.validate()?;
    Ok(config)
}

/// Connection for the one-shot commands. `--host` makes the configuration file optional.
fn connect(cli: &Cli) -> Result<Connection> {
    let settings = match &cli.host {
        Some(host) => {
            init_logging(cli, "info")?;
            ConnectionSettings::new(host.clone(), cli.port.unwrap_or(8080))
        }
        None => {
            let config = load_config(cli)?;
            init_logging(cli, &config.application.log_level)?;
            config.connection
        }
    };
    Ok(Connection::http(&settings)?)
}

fn init_logging(cli: &Cli, level: &str) -> Result<()> {
    let level = logging::parse_log_level(level)?;
    logging::init(TracingConfig::new(level).with_format(cli.log_format))?;
    Ok(())
}

async fn watch(cli: &Cli, start: bool) -> Result<()> {
    let config = load_config(cli)?;
    init_logging(cli, &config.application.log_level)?;
    info!(
        application = %config.application.name,
        device = %config.connection.base_url(),
        "Watching experiment"
    );

    let connection = Connection::http(&config.connection)?;
    let experiment = Experiment::from_settings(connection, &config.experiment)?;
    let mut failures = experiment.subscribe_failures();

    experiment.add_data_listener(|new_data: &[Buffer], full_update: bool| {
        for buffer in new_data {
            info!(
                buffer = buffer.name(),
                samples = buffer.size(),
                last = ?buffer.last(),
                full_update,
                "Update"
            );
        }
    });

    if start {
        experiment.start_experiment(true).await?;
    } else {
        experiment.restart_polling();
    }

    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Interrupted");
                break Ok(());
            }
            failure = failures.recv() => match failure {
                Ok(report) => break Err(anyhow::anyhow!("{report}")),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed failure reports"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    experiment.shutdown();
    outcome
}
