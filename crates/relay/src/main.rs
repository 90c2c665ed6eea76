//! certrelay - Main entry point
//!
//! Certificate issuance relay: reads CSR requests as JSON lines on stdin,
//! drives the ACME issuer, and writes certificates and status on stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use certrelay::credentials::configured_credential;
use certrelay::signals::{load_config, watch_signals, SignalManager};
use certrelay::{
    relay_inbound, relay_outbound, EnvironmentCredentialStore, ExecutionEnvironment,
    LocalEnvironment, Orchestrator,
};
use certrelay_common::{init_tracing, LogFormat};
use certrelay_config::Config;

/// Capacity of the outbound message queue.
const OUTBOUND_QUEUE: usize = 64;

/// How long runtime shutdown waits for background tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// certrelay - certificate issuance relay for ACME DNS-01 issuers
#[derive(Parser, Debug)]
#[command(name = "certrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTRELAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test,
    /// Run the relay (default)
    Run,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Test) => test_config(cli.config),
        Some(Commands::Run) | None => run(cli.config, cli.verbose),
    }
}

/// Load, validate, and lint a configuration, then exit.
fn test_config(config_path: Option<PathBuf>) -> Result<()> {
    init_tracing("info", LogFormat::Pretty)?;

    let config = match &config_path {
        Some(path) => {
            info!("Testing configuration file: {}", path.display());
            Config::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            info!("Testing embedded default configuration");
            Config::default_embedded().context("Failed to load embedded configuration")?
        }
    };

    let result = config.check();
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for err in &result.errors {
        error!("{}", err);
    }

    let name = config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(embedded)".to_string());

    if !result.is_valid() {
        anyhow::bail!(
            "configuration file {} test failed with {} error(s)",
            name,
            result.errors.len()
        );
    }

    info!("Configuration test successful:");
    info!("  - issuer: {} ({} mode)", config.issuer.binary, config.issuer.mode);
    info!("  - dns plugin: {}", config.issuer.dns_plugin);
    info!("  - output: {}", config.paths.output_root.display());
    info!("  - {} warning(s)", result.warnings.len());

    println!("certrelay: configuration file {} test is successful", name);
    Ok(())
}

/// Run the relay until stdin closes or a shutdown signal arrives.
fn run(config_path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config = load_config(config_path.as_deref())?;

    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level, config.logging.format)?;

    match &config_path {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No configuration specified, using embedded default configuration"),
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(serve(config, config_path));

    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn serve(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let environment: Arc<dyn ExecutionEnvironment> =
        Arc::new(LocalEnvironment::from_config(&config));
    let credentials = Arc::new(EnvironmentCredentialStore::new(
        environment.clone(),
        config.paths.credential.clone(),
    ));

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let orchestrator = Orchestrator::new(&config, environment, credentials, outbound_tx);
    let handle = orchestrator.handle();

    // Install the configured credential before any request arrives.
    handle.configuration_changed(configured_credential(&config))?;

    let writer = tokio::spawn(relay_outbound(outbound_rx, tokio::io::stdout()));

    let reader_handle = handle.clone();
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        match relay_inbound(stdin, &reader_handle).await {
            Ok(_) => info!("Input closed, shutting down"),
            Err(e) => error!(error = %e, "Inbound relay failed, shutting down"),
        }
        let _ = reader_handle.shutdown();
    });

    let signals = SignalManager::new().context("Failed to register signal handlers")?;
    tokio::spawn(watch_signals(signals, handle, config_path, config));

    info!("certrelay started");
    orchestrator.run().await?;

    match writer.await {
        Ok(Ok(written)) => info!(written, "Outbound relay drained"),
        Ok(Err(e)) => error!(error = %e, "Outbound relay failed"),
        Err(e) => error!(error = %e, "Outbound relay task panicked"),
    }
    Ok(())
}
