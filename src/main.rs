use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use wabridge::clients::{AiClient, DbClient};
use wabridge::config::BridgeConfig;
use wabridge::http::{self, AppState};
use wabridge::manager::ConnectionManager;
use wabridge::router::MessageRouter;
use wabridge::store::SessionStore;
use wabridge::transport::memory::MemoryConnector;
use wabridge::transport::Connector;
use wabridge::vault::CredentialVault;

/// Multi-tenant WhatsApp bridge for AI-assisted merchant conversations.
#[derive(Parser)]
#[command(name = "wabridge", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "wabridge.toml")]
    config: PathBuf,

    /// Override the HTTP port from the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = BridgeConfig::load(&cli.config).context("failed to load configuration")?;
    if let Some(port) = cli.port {
        cfg.http_port = port;
    }

    let connector: Arc<dyn Connector> = match cfg.transport.as_str() {
        "memory" => Arc::new(MemoryConnector::new()),
        other => anyhow::bail!(
            "unknown transport {other:?}; production WhatsApp adapters plug in \
             through the transport::Connector trait"
        ),
    };

    let store = Arc::new(SessionStore::new(cfg.context_ttl()));
    if let Some(ttl) = cfg.context_ttl() {
        let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(3600));
        store.spawn_purge_sweep(period);
    }
    let vault = CredentialVault::new(&cfg.session_dir);
    let router = Arc::new(MessageRouter::new(
        store.clone(),
        DbClient::new(&cfg.db_service_url),
        AiClient::new(&cfg.ai_service_url),
    ));
    let manager = Arc::new(ConnectionManager::new(
        store.clone(),
        vault,
        connector,
        router,
        cfg.reconnect.clone(),
    ));

    // Re-establish every session with persisted credentials before serving.
    manager.recover_all().await;

    let app = http::router(AppState {
        store,
        manager,
        default_country_code: cfg.default_country_code.clone(),
    });

    let addr = format!("{}:{}", cfg.bind_addr, cfg.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("http: multi-session WhatsApp bridge listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
