//! Perch CLI
//!
//! TigerStyle: Command-line tools for Perch with explicit error handling.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use perch_cli::settings::{
    format_instance, load_config, log_filter, next_state, parse_tag, print_change,
};
use perch_core::{init_telemetry, PerchConfig, TelemetryConfig};
use perch_registry::{
    CoordinationStore, DiscoveryResult, Endpoint, EtcdStore, LeaseRegistry, LeaseResolver,
    RegistrationInfo, RegistrationState, Registry, RegistryError, Resolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Perch CLI
#[derive(Parser, Debug)]
#[command(name = "perch")]
#[command(about = "Register and discover services in etcd")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "PERCH_CONFIG")]
    config: Option<PathBuf>,

    /// Comma separated etcd endpoints (default: 127.0.0.1:2379)
    #[arg(short, long, global = true, env = "PERCH_ENDPOINTS")]
    endpoints: Option<String>,

    /// Key prefix (default: perch/registry)
    #[arg(short, long, global = true)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register an instance and keep it registered until Ctrl-C
    Register {
        /// Service name
        #[arg(short, long)]
        service: String,

        /// Address to register (host:port, :port for all interfaces)
        #[arg(short, long)]
        addr: String,

        /// Transport network
        #[arg(long, default_value = "tcp")]
        network: String,

        /// Load-balancing weight
        #[arg(short, long, default_value_t = 0)]
        weight: i64,

        /// Tag as key=value; repeatable
        #[arg(short, long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },

    /// Resolve the live instances of a service once
    Resolve {
        /// Service name
        #[arg(short, long)]
        service: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve periodically and print changes
    Watch {
        /// Service name
        #[arg(short, long)]
        service: String,

        /// Seconds between resolutions
        #[arg(short, long, default_value_t = 5)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _telemetry =
        init_telemetry(TelemetryConfig::new("perch-cli").with_log_level(log_filter(cli.verbose)))
            .context("Failed to initialize logging")?;

    let config = load_config(
        cli.config.as_deref(),
        cli.endpoints.as_deref(),
        cli.prefix.as_deref(),
    )?;
    let store: Arc<dyn CoordinationStore> = Arc::new(
        EtcdStore::connect(&config.store)
            .await
            .with_context(|| format!("Failed to connect to {}", config.store.endpoints.join(",")))?,
    );

    match cli.command {
        Commands::Register {
            service,
            addr,
            network,
            weight,
            tags,
        } => {
            let mut info = RegistrationInfo::new(service, Endpoint::new(network, addr))
                .with_weight(weight);
            info.tags.extend(tags);
            cmd_register(store, &config, info).await
        }
        Commands::Resolve { service, json } => cmd_resolve(store, &config, &service, json).await,
        Commands::Watch {
            service,
            interval_secs,
        } => cmd_watch(store, &config, &service, interval_secs).await,
    }
}

/// Register, hold until Ctrl-C, then deregister
async fn cmd_register(
    store: Arc<dyn CoordinationStore>,
    config: &PerchConfig,
    info: RegistrationInfo,
) -> Result<()> {
    let registry = LeaseRegistry::from_config(store, config)?;
    registry
        .register(&info)
        .await
        .context("Failed to register")?;

    let key = registry.key_for(&info)?;
    info!(key = %key, "Registered");
    println!();
    println!("{} Registered {}", "Success!".green().bold(), key.cyan());
    println!("{}", "Press Ctrl-C to deregister and exit.".dimmed());

    let mut state_rx = registry.watch_state(&info).await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to wait for Ctrl-C")?;
                break;
            }
            Some(state) = next_state(&mut state_rx) => match state {
                RegistrationState::Healing => warn!(key = %key, "Registration lost, re-registering"),
                RegistrationState::Registered => info!(key = %key, "Registration restored"),
                RegistrationState::Abandoned => {
                    error!(key = %key, "Gave up re-registering");
                    eprintln!(
                        "{} {} will lapse with its lease",
                        "Abandoned:".red().bold(),
                        key
                    );
                }
                RegistrationState::Unregistered => debug!(key = %key, "Registration stopped"),
            },
        }
    }

    registry
        .deregister(&info)
        .await
        .context("Failed to deregister")?;
    println!("{} Deregistered {}", "Done.".green().bold(), key);
    Ok(())
}

/// One-shot resolution
async fn cmd_resolve(
    store: Arc<dyn CoordinationStore>,
    config: &PerchConfig,
    service: &str,
    json_output: bool,
) -> Result<()> {
    let resolver = LeaseResolver::from_config(store, config)?;
    let result = match resolver.resolve(&resolver.target(service)).await {
        Ok(result) => result,
        Err(RegistryError::NoInstances { .. }) => {
            if json_output {
                println!("[]");
            } else {
                println!("{}", format!("No instances of {}.", service).dimmed());
            }
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to resolve"),
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result.instances)?);
        return Ok(());
    }

    println!();
    println!(
        "{} ({} instances)",
        service.bold(),
        result.instances.len()
    );
    println!("{}", "-".repeat(60));
    for instance in &result.instances {
        println!("  {}", format_instance(instance));
    }
    println!();
    Ok(())
}

/// Periodic resolution with diffs
async fn cmd_watch(
    store: Arc<dyn CoordinationStore>,
    config: &PerchConfig,
    service: &str,
    interval_secs: u64,
) -> Result<()> {
    let resolver = LeaseResolver::from_config(store, config)?;
    let target = resolver.target(service);
    let mut previous = DiscoveryResult::new(target.clone(), Vec::new());
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    println!("{}", format!("Watching {} (Ctrl-C to stop)", service).dimmed());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = interval.tick() => {}
        }

        let next = match resolver.resolve(&target).await {
            Ok(next) => next,
            Err(RegistryError::NoInstances { .. }) => DiscoveryResult::new(target.clone(), Vec::new()),
            Err(e) => {
                warn!(service = %service, error = %e, "Resolve failed");
                eprintln!("{} {}", "Resolve failed:".red().bold(), e);
                continue;
            }
        };

        let (change, has_changes) = resolver.diff(&target, &previous, &next);
        if has_changes {
            println!(
                "{} ({} instances)",
                service.bold(),
                change.result.instances.len()
            );
            print_change(&change);
        }
        previous = next;
    }
}
