use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use accounts_api::config::Config;
use accounts_api::engine::{spawn_expiry_task, UnconfirmedAccountSweeper};
use accounts_api::media::ImageStore;
use accounts_api::notifications::build_mailer;
use accounts_api::AppState;

#[derive(Parser, Debug)]
#[command(name = "accounts-api")]
#[command(author, version, about = "Account registration and authentication API", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "accounts.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Delete unconfirmed accounts past the grace period once, then exit
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.server.data_dir.display()
        )
    })?;

    let images = ImageStore::new(config.media.dir.clone());
    images
        .ensure_dirs()
        .await
        .with_context(|| format!("Failed to create media directory {}", config.media.dir.display()))?;

    let db = accounts_api::db::init(&config.database_path()).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, db, images).await,
        Commands::Sweep => {
            let sweeper = UnconfirmedAccountSweeper::new(db, images, &config.accounts);
            let stats = sweeper.run_once(chrono::Utc::now()).await?;
            println!(
                "Removed {} unconfirmed account(s), {} image file(s), {} expired session(s)",
                stats.accounts_removed, stats.image_files_removed, stats.sessions_removed
            );
            Ok(())
        }
    }
}

async fn serve(config: Config, db: accounts_api::DbPool, images: ImageStore) -> Result<()> {
    tracing::info!("Starting accounts-api v{}", env!("CARGO_PKG_VERSION"));

    let mailer = build_mailer(&config.email);
    let state = Arc::new(AppState::new(config.clone(), db.clone(), mailer));

    spawn_expiry_task(db, images, config.accounts.clone());

    if config.rate_limit.enabled {
        accounts_api::api::rate_limit::spawn_cleanup_task(
            state.rate_limiter.clone(),
            config.rate_limit.cleanup_interval,
        );
    }

    let app = accounts_api::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
