//! chansync-server binary entry point.
//!
//! Usage:
//! ```bash
//! chansync-server --config chansync.toml
//! chansync-server --help
//! ```

use anyhow::{Context, Result};
use chansync_server::cleanup::spawn_cleanup_task;
use chansync_server::config::{PubSubBackend, StoreBackend};
use chansync_server::http::{build_router, health::init_start_time};
use chansync_server::{
    Broker, Config, KvStore, LocalBroker, MemoryStore, RedisBroker, RedisStore, SchemaRegistry,
    SqliteStore, SyncServer,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chansync-server")]
#[command(about = "Channel-addressed CRUD and pub/sub synchronization server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "chansync.toml")]
    config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    init_tracing(&config, args.verbose);

    info!("chansync-server v{} starting...", env!("CARGO_PKG_VERSION"));
    init_start_time();

    let store = open_store(&config).await.context("failed to open store")?;
    let broker = open_broker(&config).await.context("failed to connect broker")?;
    let schemas = SchemaRegistry::builder()
        .with_config_types(&config.types)
        .build();
    info!("Registered {} type schema(s)", schemas.len());

    let server = Arc::new(SyncServer::new(config, store, broker, schemas));
    let bridge = server.spawn_bridge();
    let cleanup = spawn_cleanup_task(
        server.rate_limits().clone(),
        server.router().clone(),
        server.config().cleanup.clone(),
    );

    let addr = server.config().server.bind_address.clone();
    let app = build_router(server.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        "Listening on {} (ws path {})",
        addr,
        server.config().server.ws_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    cleanup.abort();
    bridge.abort();
    info!("chansync-server stopped");
    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> chansync_server::error::Result<Config> {
    if path.exists() {
        Ok(Config::from_file(path)?)
    } else {
        Ok(Config::default())
    }
}

/// `RUST_LOG` wins over the configured level; `--verbose` forces debug.
fn init_tracing(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn open_store(config: &Config) -> chansync_server::error::Result<Arc<dyn KvStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = &config.store.database;
            info!("Using SQLite store at {}", path.display());
            Ok(Arc::new(SqliteStore::new(path).await?))
        }
        StoreBackend::Redis => {
            info!("Using Redis store at {}", config.redis.url);
            Ok(Arc::new(RedisStore::connect(&config.redis.url).await?))
        }
    }
}

async fn open_broker(config: &Config) -> chansync_server::error::Result<Arc<dyn Broker>> {
    let capacity = config.pubsub.event_buffer;
    match config.pubsub.backend {
        PubSubBackend::Local => {
            info!("Using in-process broker");
            Ok(Arc::new(LocalBroker::standalone(capacity)))
        }
        PubSubBackend::Redis => {
            info!("Using Redis broker at {}", config.redis.url);
            Ok(Arc::new(RedisBroker::connect(&config.redis.url, capacity).await?))
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("Failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
