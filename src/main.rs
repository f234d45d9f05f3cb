// src/main.rs
mod cluster;
mod config;
mod kubeconfig;
mod transfer;
mod utils;
mod web;

use clap::Parser;
use std::{io, sync::Arc};
use tracing::{error, info, warn};

use cluster::{CredentialResolver, KubeSecretStore};
use config::ServiceConfig;
use kubeconfig::KubeconfigWriter;
use transfer::{FileTransferService, KubectlRunner, StagingArea, TransferExecutor};
use web::WebServerState;

/// Builds the resolver, or `None` when the control plane is unreachable.
/// Without it only in-cluster transfers are served.
fn init_resolver(config: &ServiceConfig) -> Option<CredentialResolver> {
    match KubeSecretStore::in_cluster() {
        Ok(store) => {
            info!(
                namespace = config.argocd_namespace(),
                "multi-cluster support enabled"
            );
            Some(CredentialResolver::new(
                Arc::new(store),
                config.argocd_namespace(),
            ))
        }
        Err(e) => {
            warn!("Failed to initialize cluster credential manager: {}", e);
            warn!("Multi-cluster support will be disabled. In-cluster operations will still work.");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
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
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = ServiceConfig::parse();
    utils::logging::init_logging(config.debug, config.log_file().as_deref())?;

    let staging = StagingArea::new(config.staging_root());
    info!(root = %staging.root().display(), "staging transfers");

    let executor = TransferExecutor::new(
        Arc::new(KubectlRunner::new(config.kubectl.clone())),
        KubeconfigWriter::default(),
    );
    let service = FileTransferService::new(init_resolver(&config), staging, executor);

    let state = Arc::new(WebServerState::new(
        config.port,
        config.ui_dir(),
        config.max_upload_bytes(),
        Arc::new(service),
    ));

    // Create shutdown channel and spawn web server
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut web_server = tokio::spawn(web::start_web_server(state, shutdown_rx));

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutting down");
            let _ = shutdown_tx.send(());
        }
        result = &mut web_server => return server_result(result),
    }

    // Wait for in-flight requests to drain
    server_result(web_server.await)
}

fn server_result(result: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Server error: {}", e);
            Err(e)
        }
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
    }
}
