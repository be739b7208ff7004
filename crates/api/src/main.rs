use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelforge_api::config::ServerConfig;
use reelforge_api::router::build_app_router;
use reelforge_api::state::{AppState, Services};
use reelforge_events::{EventBus, EventPersistence};
use reelforge_pipeline::{ChatCompletionsProposer, FsProjectStore};
use reelforge_provider::ReplicateProvider;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    // `LOG_FORMAT=json` switches to one JSON object per line.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "reelforge_api=debug,reelforge_pipeline=debug,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        projects_root = %config.projects_root.display(),
        data_dir = %config.data_dir.display(),
        "Loaded server configuration",
    );

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .expect("Failed to create DATA_DIR");

    // --- Collaborators ---
    let store = Arc::new(FsProjectStore::new(config.projects_root.clone()));
    let provider = Arc::new(ReplicateProvider::new(&config.provider));
    if !config.provider.is_configured() {
        tracing::warn!("REPLICATE_API_TOKEN is not set; generation jobs will be refused");
    }
    if config.proposer.api_key.is_none() {
        tracing::warn!("PROPOSER_API_KEY is not set; agent runs will fail to propose");
    }
    let proposer = Arc::new(ChatCompletionsProposer::new(config.proposer.clone()));

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let journal_cancel = CancellationToken::new();
    let persistence_handle = tokio::spawn(EventPersistence::run(
        config.data_dir.clone(),
        event_bus.journal(),
        journal_cancel.clone(),
    ));
    tracing::info!("Event persistence started");

    // --- App state ---
    let state = AppState::assemble(
        config.clone(),
        Services {
            store: store.clone(),
            reindexer: store,
            provider,
            proposer,
        },
        event_bus,
    );
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // The router's state still holds the bus, so stop the journal explicitly.
    journal_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), persistence_handle)
        .await
        .is_err()
    {
        tracing::warn!("Event journal did not finish within 5s");
    }
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
