//! Vesper strike engine - main entry point
//!
//! Loads configuration, builds one chain context per enabled chain and runs
//! each on its own supervised thread until Ctrl+C or SIGTERM.

use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vesper_dataplane::Chain;
use vesper_intelligence::telemetry::install_prometheus_exporter;
use vesper_intelligence::{spawn_chain_thread, ChainContext, RestartPolicy, VesperConfig, VERSION};

#[derive(Debug, Parser)]
#[command(name = "vesper", version = VERSION, about = "Mempool-triggered cycle arbitrage across EVM chains")]
struct Cli {
    /// Configuration file path (YAML or TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only run these chains (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "CHAIN")]
    chains: Option<Vec<String>>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,

    /// Run the full pipeline but never submit
    #[arg(long)]
    dry_run: bool,

    /// Write an example config and exit
    #[arg(long, value_name = "OUTPUT")]
    generate_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    if let Some(output) = &cli.generate_config {
        VesperConfig::example()
            .save_to_file(output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Generated example config at: {}", output.display());
        return Ok(());
    }

    let mut config = VesperConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.global.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.global.log_format = format.clone();
    }
    if cli.dry_run {
        config.global.dry_run = true;
    }

    init_logging(&config.global.log_level, &config.global.log_format);
    info!(version = VERSION, "Vesper strike engine starting");

    config.validate().context("invalid configuration")?;
    if config.global.dry_run {
        warn!("Running in DRY-RUN mode, no strikes will be submitted");
    }

    let only = cli
        .chains
        .as_ref()
        .map(|names| names.iter().map(|name| name.parse::<Chain>()).collect::<Result<Vec<_>, _>>())
        .transpose()
        .context("invalid --chains")?;
    let chains = config.enabled_chains(only.as_deref());
    if chains.is_empty() {
        anyhow::bail!("none of the requested chains is enabled");
    }

    if let Some(addr) = &config.global.metrics_addr {
        // Outside a runtime the exporter starts its own listener thread
        install_prometheus_exporter(addr).context("failed to start metrics exporter")?;
    }

    // Build every context before starting any, so a bad chain aborts startup
    let mut contexts = Vec::with_capacity(chains.len());
    for chain in &chains {
        let context = ChainContext::build(*chain, &config)
            .with_context(|| format!("failed to build {} context", chain))?;
        contexts.push(context);
    }

    let shutdown = CancellationToken::new();
    let mut handles = Vec::with_capacity(contexts.len());
    for context in contexts {
        let chain = context.chain();
        let rebuild_config = config.clone();
        let handle = spawn_chain_thread(
            context,
            move || ChainContext::build(chain, &rebuild_config),
            config.global.worker_threads,
            RestartPolicy::default(),
            shutdown.clone(),
        )
        .with_context(|| format!("failed to start {} thread", chain))?;
        info!(chain = %chain, "Chain thread started");
        handles.push((chain, handle));
    }

    info!(chains = ?chains, "Vesper running");

    let signal_runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    signal_runtime.block_on(wait_for_shutdown());
    info!("Shutdown signal received, stopping chains");
    shutdown.cancel();

    for (chain, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => info!(chain = %chain, "Chain stopped"),
            Ok(Err(e)) => error!(chain = %chain, error = %e, "Chain stopped with error"),
            Err(_) => error!(chain = %chain, "Chain thread panicked"),
        }
    }

    info!("Vesper stopped");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vesper_intelligence={0},vesper_dataplane={0},vesper={0}", level)));

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
