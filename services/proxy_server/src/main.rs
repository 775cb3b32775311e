use std::{sync::Arc, time::Duration};

use anyhow::Context;
use proxy_server::{
    auth::ReplayGuard, metrics::ServerMetrics, shutdown::ShutdownCoordinator, AppState, Config,
};
use telemetry::metrics::Telemetry;
use tracing_subscriber::{filter::EnvFilter, fmt::time::UtcTime, prelude::*};

fn main() {
    let config = Config::load().expect("Failed to load config");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
        .block_on(async {
            if let Err(e) = run(config).await {
                tracing::error!("Fatal error during setup: {e:#}");
                std::process::exit(1);
            }
        });
}

async fn run(config: Config) -> anyhow::Result<()> {
    let filter_layer = EnvFilter::try_new(&config.rust_log)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialize tracing filter")?;

    if config.log_format == "pretty" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .pretty();
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .with_level(true)
            .json();
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }

    let addr = format!("0.0.0.0:{}", config.proxy_service_port);
    tracing::info!("Starting proxy-server at: {addr}");

    let pool_config = config.pool_config().context("Invalid pool configuration")?;
    let pool = pg_pool::ConnectionPool::new(config.database_url.clone(), pool_config)
        .context("Invalid pool configuration")?;
    pool.start().await.context("Failed to start connection pool")?;

    let auth = Arc::new(ReplayGuard::new(
        config.proxy_auth_secret.clone().into_bytes(),
        Duration::from_secs(config.token_replay_window_secs),
    ));
    auth.spawn_sweeper();

    let metrics = ServerMetrics::new(None).context("Failed to create server metrics")?;
    let telemetry = Telemetry::new(Some(metrics))
        .await
        .context("Failed to create telemetry")?;
    telemetry.start().await.context("Failed to start telemetry")?;

    let shutdown = Arc::new(ShutdownCoordinator::new(pool.clone()));

    let state = AppState {
        pool,
        auth,
        config: Arc::new(config),
        telemetry,
        shutdown: shutdown.clone(),
    };

    let app = proxy_server::app(state);

    let shutdown_handle = shutdown.clone();
    tokio::spawn(async move {
        proxy_server::shutdown::listen_for_shutdown_signals().await;
        shutdown_handle.shutdown().await;
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .context("Server exited with error")?;

    Ok(())
}
