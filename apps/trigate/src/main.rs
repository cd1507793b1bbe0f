use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

mod cli;

use trigate_core::{BackendClient, BackendClientConfig, GatewayEngine};
use trigate_pool::{CredentialPool, DeviceFlow, RefreshTask, UpstreamAuth};
use trigate_router::{gateway_router, AppState};
use trigate_storage::{CredentialStore, SeaOrmStore};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("trigate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Cli::parse().into_patch().into_config()?;
    info!(
        host = %config.host,
        port = config.port,
        api_base = %config.api_base,
        production = config.production,
        default_model = %config.default_model,
        "config loaded"
    );

    let store = SeaOrmStore::connect(&config.dsn).await?;
    store.sync().await?;
    info!(dsn = %config.dsn, "db connected");
    let store: Arc<dyn CredentialStore> = Arc::new(store);

    let client = BackendClient::new(BackendClientConfig::new(
        config.api_base.clone(),
        config.auth_base.clone(),
    ))?;
    let auth: Arc<dyn UpstreamAuth> = Arc::new(client.clone());

    let pool = Arc::new(CredentialPool::new(auth.clone(), store));
    let loaded = pool.load_from_store().await?;
    info!(credentials = loaded, "pool loaded");

    // First tick fires immediately, covering the initial token exchange
    // for everything loaded above.
    let _refresh = RefreshTask::start(
        pool.clone(),
        Duration::from_secs(config.refresh_interval_secs),
    );

    let engine = Arc::new(GatewayEngine::new(
        pool.clone(),
        client,
        config.default_model.clone(),
    ));
    let flow = Arc::new(DeviceFlow::new(pool, auth));
    let state = AppState::new(engine, flow, config.api_key.as_deref(), config.production);
    let app = gateway_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trigate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
