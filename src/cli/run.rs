use crate::config::load_config;
use crate::ingress;
use crate::pipeline::Pipeline;
use crate::storage::LocalObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::traits::StorageError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("parameter export error: {0}")]
    Parameters(#[from] crate::parameters::ParameterError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/pubsub/config.yml");
            eprintln!("  /etc/pubsub/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'pubsub config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_pipeline(&config_path).await.map_err(|e| e.into())
}

async fn run_pipeline(config_path: &PathBuf) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    info!(path = %config.storage.path.display(), "Initializing object store");
    let store = Arc::new(LocalObjectStore::open(&config.storage.path).await?);

    let pipeline = Pipeline::start(&config, store).await?;

    if let Some(parameters) = &config.parameters {
        pipeline.parameters().export(&parameters.path).await?;
    }

    let listener = TcpListener::bind(&config.ingress.listen)
        .await
        .map_err(|source| RunError::Bind {
            addr: config.ingress.listen.clone(),
            source,
        })?;

    // The server stops on its own token so the pipeline can keep
    // draining after the listener is gone.
    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(ingress::serve(
        listener,
        pipeline.app_state(),
        server_shutdown.clone(),
    ));

    info!("Pipeline started, press Ctrl+C to shutdown");

    let pipeline_token = pipeline.shutdown_token();
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = pipeline_token.cancelled() => {
            info!("Pipeline cancelled");
        }
    }

    server_shutdown.cancel();
    let report = pipeline.shutdown().await?;

    match server.await? {
        Ok(()) => info!("Web server stopped"),
        Err(e) => {
            error!(error = %e, "Web server error");
            return Err(RunError::WebServer(e));
        }
    }

    info!(
        events_accepted = report.stats.events_accepted,
        bytes_written = report.stats.bytes_written,
        objects_written = report.stats.objects_written,
        "Shutdown complete"
    );
    Ok(())
}
