//! Courier Server
//!
//! Registry HTTP server binary.

use anyhow::Context;
use clap::Parser;
use courier_core::{
    init_telemetry, CourierConfig, IoContext, StoreBackend, TelemetryConfig,
    MEMORY_SWEEP_INTERVAL_MS_DEFAULT,
};
use courier_registry::{ExpirationListener, InstanceRegistry};
use courier_server::{router, AppState};
use courier_store::{ExpirySweeper, MemoryStore, RedisStore, StateStore};
use std::sync::Arc;

/// Courier server CLI
#[derive(Parser, Debug)]
#[command(name = "courier-server")]
#[command(about = "Courier sticky instance registry server")]
#[command(version)]
struct Cli {
    /// Configuration file path (missing file means defaults)
    #[arg(short, long, default_value = "courier.yaml")]
    config: String,

    /// Bind address, overrides server.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Redis URL; selects the redis backend
    #[arg(long, env = "COURIER_REDIS_URL")]
    redis_url: Option<String>,

    /// Run on the in-process store; workers cannot heartbeat into it
    #[arg(long, env = "COURIER_ALLOW_MEMORY")]
    allow_memory: bool,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Store plus whatever keeps it running
struct StoreRuntime {
    store: Arc<dyn StateStore>,
    sweeper: Option<ExpirySweeper>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if cli.verbose > 0 {
        telemetry = telemetry.with_verbosity(cli.verbose);
    }
    init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    let mut config = CourierConfig::read_or_default(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(url) = cli.redis_url {
        config.store.backend = StoreBackend::Redis;
        config.store.redis_url = Some(url);
    }
    config.validate().context("invalid configuration")?;
    require_shared_store(&config, cli.allow_memory)?;

    tracing::info!(
        config = %cli.config,
        bind = %config.server.bind_address,
        backend = ?config.store.backend,
        "Courier server starting"
    );

    let io = IoContext::production();
    let runtime = open_store(&config, &io).await?;
    let registry = Arc::new(InstanceRegistry::from_config(
        runtime.store.clone(),
        &config,
        io.clone(),
    ));

    let listener_handle = if config.listener.enabled {
        Some(ExpirationListener::new(registry.clone(), config.listener, io.clone()).spawn())
    } else {
        tracing::info!("Expiration listener disabled; eviction is lazy only");
        None
    };

    let app = router(AppState::new(registry));
    let tcp = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    tracing::info!(addr = %config.server.bind_address, "Listening");

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(handle) = listener_handle {
        handle.shutdown().await;
    }
    if let Some(sweeper) = runtime.sweeper {
        sweeper.shutdown().await;
    }
    tracing::info!("Courier server stopped");
    Ok(())
}

/// Workers heartbeat straight into the shared store, so a memory store only
/// serves assignments when something in this process writes heartbeats
fn require_shared_store(config: &CourierConfig, allow_memory: bool) -> anyhow::Result<()> {
    if config.store.backend == StoreBackend::Memory && !allow_memory {
        anyhow::bail!(
            "store.backend is memory, which workers cannot reach; \
             set store.backend: redis (or --redis-url), or pass --allow-memory"
        );
    }
    Ok(())
}

async fn open_store(config: &CourierConfig, io: &IoContext) -> anyhow::Result<StoreRuntime> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = MemoryStore::with_io(io.clone());
            let sweeper = store.spawn_sweeper(MEMORY_SWEEP_INTERVAL_MS_DEFAULT);
            tracing::warn!("Using in-memory store; state is not shared with workers");
            Ok(StoreRuntime {
                store: Arc::new(store),
                sweeper: Some(sweeper),
            })
        }
        StoreBackend::Redis => {
            let url = config
                .store
                .redis_url
                .as_deref()
                .context("store.redis_url is required for the redis backend")?;
            let store = RedisStore::connect(url)
                .await
                .context("failed to connect to redis")?;
            if config.store.configure_keyspace_events {
                if let Err(e) = store.configure_keyspace_events().await {
                    tracing::warn!(
                        error = %e,
                        "Could not enable keyspace events; eager eviction may not fire"
                    );
                }
            }
            Ok(StoreRuntime {
                store: Arc::new(store),
                sweeper: None,
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
