use anyhow::Context;
use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use xsscan::config::AppConfig;
use xsscan::{browser, routes, AppState};

// M-MIMALLOC-APP: Use mimalloc as global allocator for improved performance.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    let default_filter = if config.debug {
        "xsscan=debug,tower_http=debug"
    } else {
        "xsscan=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let browser = browser::launch(&config.browser)
        .await
        .context("Failed to launch browser")?;
    match browser.version().await {
        Ok(version) => tracing::info!(%version, "Browser ready"),
        Err(e) => tracing::warn!(error = %e, "Browser version unavailable"),
    }

    let state = AppState::new(config.clone(), browser)?;
    let app = routes::create_router(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Unable to bind {}:{}", config.host, config.port))?;
    tracing::info!(
        host = %listener.local_addr()?,
        timeout_secs = config.request_timeout_secs,
        perf = config.perf_mode,
        cache = config.allow_cache,
        "Starting xsscan server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
}
