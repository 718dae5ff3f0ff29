//! Courier CLI
//!
//! TigerStyle: Command-line tools for the registry with explicit error handling.

mod client;
mod worker;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{CourierClient, DEFAULT_SERVER_URL};
use colored::Colorize;
use courier_core::{init_telemetry, CourierConfig, IoContext, TelemetryConfig, REDIS_URL_DEFAULT};
use courier_registry::{HeartbeatReporter, InstanceAddress, InstanceId, KeySchema};
use courier_store::RedisStore;
use std::sync::Arc;
use worker::{RegistrationTask, WORKER_ADDRESS_DEFAULT};

/// Courier CLI
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Courier sticky instance registry CLI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Registry URL
    #[arg(short, long, default_value = DEFAULT_SERVER_URL, env = "COURIER_REGISTRY_URL", global = true)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show registry health and instances
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register an instance
    Register {
        instance_id: String,

        /// Address clients use to reach the instance
        #[arg(short, long)]
        address: String,
    },

    /// Resolve a user's sticky instance
    Assign {
        user_id: String,

        /// Output raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Remove an instance from the pool and release its users
    Evict { instance_id: String },

    /// Repair drift between assignments and the reverse index
    Reconcile,

    /// Run a worker agent: heartbeat to the store and stay registered
    Worker {
        /// Instance ID (generated when omitted)
        #[arg(long)]
        instance_id: Option<String>,

        /// Address advertised to clients
        #[arg(short, long, default_value = WORKER_ADDRESS_DEFAULT, env = "COURIER_WORKER_ADDRESS")]
        address: String,

        /// Redis URL of the shared store
        #[arg(long, default_value = REDIS_URL_DEFAULT, env = "COURIER_REDIS_URL")]
        redis_url: String,

        /// Configuration file for heartbeat settings and key namespace
        #[arg(short, long, default_value = "courier.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Quiet by default; the worker logs at info
    let level = match (&cli.command, cli.verbose) {
        (Commands::Worker { .. }, 0) => "info",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };
    init_telemetry(&TelemetryConfig::new("courier").with_log_level(level).without_target())
        .context("Failed to initialize telemetry")?;

    let client = CourierClient::new(&cli.server).context("Failed to create client")?;

    match cli.command {
        Commands::Status { json } => cmd_status(client, json).await,
        Commands::Register {
            instance_id,
            address,
        } => cmd_register(client, &instance_id, &address).await,
        Commands::Assign { user_id, json } => cmd_assign(client, &user_id, json).await,
        Commands::Evict { instance_id } => cmd_evict(client, &instance_id).await,
        Commands::Reconcile => cmd_reconcile(client).await,
        Commands::Worker {
            instance_id,
            address,
            redis_url,
            config,
        } => cmd_worker(client, instance_id, address, redis_url, config).await,
    }
}

/// Show registry status
async fn cmd_status(client: CourierClient, json: bool) -> Result<()> {
    let health = match client.health().await {
        Ok(health) => health,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Failed to connect:".red().bold(), e);
            eprintln!();
            eprintln!(
                "{}",
                "Make sure the Courier server is running and accessible.".dimmed()
            );
            eprintln!("  Server URL: {}", client.base_url());
            eprintln!();
            return Err(e);
        }
    };
    let list = client.list_instances().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!();
    println!("{} {}", "Status:".bold(), health.status.green());
    println!("{} {}", "Version:".bold(), health.version);
    println!("{} {}s", "Uptime:".bold(), health.uptime_seconds);
    println!("{} {}", "Instances:".bold(), list.count);
    println!();

    for instance in &list.instances {
        let state = match instance.state.as_str() {
            "alive" => instance.state.green(),
            "dead" => instance.state.red(),
            _ => instance.state.yellow(),
        };
        println!(
            "  {} {} {}",
            instance.instance_id.bold(),
            state,
            instance.address.as_deref().unwrap_or("-").dimmed()
        );
        if let Some(detail) = &instance.detail {
            println!("    {}", detail.dimmed());
        }
    }
    if !list.instances.is_empty() {
        println!();
    }
    Ok(())
}

async fn cmd_register(client: CourierClient, instance_id: &str, address: &str) -> Result<()> {
    client
        .register(instance_id, address)
        .await
        .with_context(|| format!("Failed to register {}", instance_id))?;
    println!("{} {} at {}", "Registered".green(), instance_id.bold(), address);
    Ok(())
}

async fn cmd_assign(client: CourierClient, user_id: &str, json: bool) -> Result<()> {
    let assignment = client
        .assign(user_id)
        .await
        .with_context(|| format!("Failed to assign {}", user_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assignment)?);
    } else {
        println!(
            "{} -> {} ({})",
            user_id.bold(),
            assignment.service_id.green(),
            assignment.address
        );
    }
    Ok(())
}

async fn cmd_evict(client: CourierClient, instance_id: &str) -> Result<()> {
    let report = client
        .evict(instance_id)
        .await
        .with_context(|| format!("Failed to evict {}", instance_id))?;

    let released = report["users_released"].as_u64().unwrap_or(0);
    if report["was_available"].as_bool() == Some(true) || released > 0 {
        println!(
            "{} {} ({} users released)",
            "Evicted".yellow(),
            instance_id.bold(),
            released
        );
    } else {
        println!("{} {}", "Nothing to evict for".dimmed(), instance_id);
    }
    Ok(())
}

async fn cmd_reconcile(client: CourierClient) -> Result<()> {
    let report = client.reconcile().await.context("Reconcile failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Heartbeat to the store and keep registered until interrupted
async fn cmd_worker(
    client: CourierClient,
    instance_id: Option<String>,
    address: String,
    redis_url: String,
    config_path: String,
) -> Result<()> {
    let config = CourierConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    let io = IoContext::production();

    // Fixed for the life of the process
    let instance_id = match instance_id {
        Some(raw) => InstanceId::new(raw)?,
        None => InstanceId::generate_with_rng(io.rng.as_ref()),
    };
    let address = InstanceAddress::new(address)?;

    let store = RedisStore::connect(&redis_url)
        .await
        .context("Failed to connect to redis")?;

    tracing::info!(
        instance_id = %instance_id,
        address = %address,
        registry = %client.base_url(),
        "Worker starting"
    );

    let heartbeat = HeartbeatReporter::new(
        Arc::new(store),
        KeySchema::new(config.store.key_namespace.clone()),
        instance_id.clone(),
        config.heartbeat,
        io.clone(),
    )
    .start();
    let registration =
        RegistrationTask::new(Arc::new(client), instance_id.clone(), address, io).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!(instance_id = %instance_id, "Worker stopping");

    registration.shutdown().await;
    heartbeat.shutdown().await;
    Ok(())
}
