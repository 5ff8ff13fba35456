//! sessionlb - a session-aware TCP load balancer
//!
//! Usage:
//!     sessionlb --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use sessionlb::Balancer;
use sessionlb::config::{Config, ConfigWatcher, load_config};
use sessionlb::frontend::IpFilter;
use sessionlb::metrics::MetricsServer;
use sessionlb::util::{ShutdownSignal, init_logging, wait_for_os_signal};

/// A session-aware TCP load balancer.
#[derive(Parser, Debug)]
#[command(name = "sessionlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!(
            "  Listen: {}:{}",
            config.balancer.bind_address, config.balancer.source_port
        );
        println!("  Stickiness: {}", config.balancer.stickiness);
        println!("  Targets: {}", config.balancer.targets.len());
        for target in &config.balancer.targets {
            println!("    - {}", target);
        }
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        targets = config.balancer.targets.len(),
        "sessionlb starting"
    );

    for target in &config.balancer.targets {
        info!(upstream = %target, "configured target");
    }

    run(cli.config, config)
}

/// Run the load balancer with the given configuration.
fn run(config_path: PathBuf, config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config_path, config))
}

/// Async entry point for the load balancer.
async fn run_async(config_path: PathBuf, config: Config) -> Result<()> {
    // Stops the metrics server and config watcher; the balancer has its own.
    let shutdown = ShutdownSignal::new();
    let mut handles = Vec::new();

    let balancer = Balancer::new(config.balancer.clone());

    if let Some(admission) = &config.admission {
        let filter = IpFilter::from_config(admission).context("invalid admission configuration")?;
        balancer.attach(&filter);
    }

    if config.global.metrics.enabled {
        let server = MetricsServer::bind(
            config.global.metrics.address,
            config.global.metrics.path.clone(),
            balancer.metrics().clone(),
        )
        .await
        .with_context(|| {
            format!(
                "failed to bind metrics server on {}",
                config.global.metrics.address
            )
        })?;
        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let addr = balancer
        .start()
        .await
        .context("failed to start balancer")?;

    let reload_target = balancer.clone();
    let watcher = ConfigWatcher::new(
        config_path,
        config.clone(),
        Box::new(move |new_config: &Config| {
            reload_target.set_targets(new_config.balancer.targets.clone());
        }),
    );
    info!(path = %watcher.path().display(), "watching configuration for target changes");
    handles.push(tokio::spawn(watcher.run(shutdown.subscribe())));

    info!(listen = %addr, "sessionlb is running");
    info!("press Ctrl+C to stop");

    wait_for_os_signal().await;

    balancer.close().await;
    shutdown.shutdown();
    for handle in handles {
        let _ = handle.await;
    }

    let timeout = config.balancer.shutdown_timeout;
    if !balancer.drain(timeout).await {
        warn!(
            remaining = balancer.active_connections(),
            "exiting with connections still open"
        );
    }

    info!("sessionlb shut down complete");
    Ok(())
}
