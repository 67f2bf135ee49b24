use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use license_cloud::config::{Config, StorageBackend};
use license_cloud::email::EmailService;
use license_cloud::handlers;
use license_cloud::ratelimit::RateLimiter;
use license_cloud::state::AppState;
use license_cloud::storage;

/// License issuing and validation server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Listen host (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Storage backend: memory, file or sqlite (overrides STORAGE_BACKEND)
    #[arg(long)]
    storage: Option<StorageBackend>,

    /// Data file or database path (overrides DATABASE_PATH)
    #[arg(long)]
    database_path: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(backend) = self.storage {
            // Keep the default path in step with the backend unless one was given.
            if config.database_path == PathBuf::from(config.storage_backend.default_path()) {
                config.database_path = PathBuf::from(backend.default_path());
            }
            config.storage_backend = backend;
        }
        if let Some(path) = self.database_path {
            config.database_path = path;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "license_cloud=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    tracing::info!(
        environment = %config.environment,
        storage = %config.storage_backend,
        rate_limit = config.rate_limit_requests,
        rate_limit_window_secs = config.rate_limit_window.as_secs(),
        "Starting license server"
    );

    let storage = storage::open(config.storage_backend, &config.database_path)
        .with_context(|| format!("failed to open {} storage", config.storage_backend))?;

    let email = EmailService::new(
        config.resend_api_key.clone(),
        config.email_from.clone(),
        config.email_webhook_url.clone(),
    );
    if !email.is_enabled() {
        tracing::warn!("No RESEND_API_KEY or EMAIL_WEBHOOK_URL set, license emails are disabled");
    }

    let state = AppState::new(&config, storage.clone(), Arc::new(email));
    spawn_rate_limit_purge(state.rate_limiter.clone());

    let app = handlers::app(state, config.request_timeout);
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    storage.close().context("failed to close storage")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Periodically drop rate limiter windows that have elapsed.
fn spawn_rate_limit_purge(limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = limiter.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "Purged expired rate limit windows");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
