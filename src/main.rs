use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wakegate::config::{Config, Settings};
use wakegate::proxy::ProxyServer;

/// Version information for the proxy
const VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wakegate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Optional config file; environment variables override it
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let settings = Config::load(config_path.as_deref()).map_err(|e| {
        error!(path = ?config_path, error = %e, "Failed to load configuration");
        e
    })?;

    print_startup_banner(&settings);

    let shutdown = CancellationToken::new();
    let server = ProxyServer::new(&settings, shutdown.clone())?;

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Proxy server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM), or the server failing on its own
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
            _ = &mut server_handle => {
                anyhow::bail!("Proxy server stopped unexpectedly");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = &mut server_handle => {
                anyhow::bail!("Proxy server stopped unexpectedly");
            }
        }
    }

    shutdown.cancel();

    // Wait for the server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(settings: &Settings) {
    info!(name = PKG_NAME, version = VERSION, "Starting wake-on-request proxy");
    info!(
        listen = %settings.listen_addr,
        target = %settings.target_authority(),
        mac = %settings.mac,
        "Proxy configuration"
    );
    info!(
        destinations = ?settings.wake_destinations,
        poll_interval_ms = settings.poll_interval.as_millis() as u64,
        wake_timeout_secs = settings.wake_timeout.as_secs_f64(),
        probe_timeout_ms = settings.probe_timeout.as_millis() as u64,
        "Wake settings"
    );
    info!(
        pool_max_idle = settings.pool.max_idle_per_host,
        pool_idle_timeout_secs = settings.pool.idle_timeout.as_secs(),
        "Connection pool settings"
    );
}
