use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use posegrid_store::{ObjectStore, RcloneStore};
use posegrid_worker::{WorkerAgent, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();

    let default_filter = if config.debug_mode {
        "debug"
    } else {
        "posegrid_worker=info,posegrid_store=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        remote = %config.store_remote,
        root = %config.workspace_root.display(),
        tool = %config.tool,
        "Worker starting",
    );

    let store: Arc<dyn ObjectStore> = Arc::new(RcloneStore::new(config.store_remote.clone()));
    let agent = WorkerAgent::new(store, config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    if let Err(e) = agent.run(cancel).await {
        tracing::error!(error = %e, "Worker agent exited with error");
        std::process::exit(1);
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the worker stops
/// cleanly whether interrupted interactively or by the pod supervisor.
/// An in-flight job finishes its current store operation before the loop
/// observes the cancellation.
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
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
