use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notification_dispatch_service::config::Settings;
use notification_dispatch_service::redis::{
    CircuitBreaker, CircuitBreakerConfig, RedisHealth, RedisPool,
};
use notification_dispatch_service::server::{create_app, AppState};
use notification_dispatch_service::shutdown::GracefulShutdown;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::new().context("Failed to load configuration")?;
    tracing::info!(
        store_backend = %settings.store.backend,
        queue_backend = %settings.queue.backend,
        "Configuration loaded"
    );

    let redis_pool = connect_redis(&settings).await?;

    let state = AppState::new(settings.clone(), redis_pool).context("Failed to create mail transport")?;
    state.start_workers().await;
    tracing::info!("Application state initialized");

    let app = create_app(state.clone());

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let shutdown = GracefulShutdown::new(vec![state.email_queue.clone(), state.in_app_queue.clone()]);
    shutdown.execute("server stopped").await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Connect to Redis when either backend needs it.
async fn connect_redis(settings: &Settings) -> Result<Option<Arc<RedisPool>>> {
    if settings.store.backend != "redis" && settings.queue.backend != "redis" {
        return Ok(None);
    }

    let circuit_breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig::from(
        &settings.redis,
    )));
    let pool = RedisPool::new(settings.redis.clone(), circuit_breaker, Arc::new(RedisHealth::new()))
        .context("Invalid Redis configuration")?;

    pool.wait_until_ready()
        .await
        .context("Redis did not become ready")?;
    tracing::info!(url = %settings.redis.url, "Redis ready");

    Ok(Some(Arc::new(pool)))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
