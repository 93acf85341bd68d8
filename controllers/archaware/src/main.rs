//! archaware Controller
//!
//! Keeps scheduling consistent with CPU architectures on mixed-architecture
//! clusters:
//! - Node: every node carries one `<taint-key>=<arch>:NoSchedule` taint
//! - Pod: every pod tolerates each architecture all its container images
//!   support, resolved from the images' registries
//!
//! `archaware clean` undoes both.

mod backoff;
mod clean;
mod config;
mod controller;
mod error;
mod reconcile_helpers;
mod reconciler;
mod store;
mod watcher;

#[cfg(test)]
mod reconcile_helpers_test;
#[cfg(test)]
mod test_utils;

use clap::Parser;
use config::{Cli, Command};
use controller::{Controller, build_reconciler, init_kube_client};
use k8s_openapi::api::core::v1::{Node, Pod};
use std::sync::Arc;
use store::KubeStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const OPERATOR_NAME: &str = "archaware";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { config, command } = Cli::parse();
    init_tracing(&config.log_level);

    // kube's rustls-tls feature needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    info!(operator = OPERATOR_NAME, version = VERSION, "Starting archaware controller");
    config.validate()?;

    info!("Configuration:");
    info!("  Taint key: {}", config.taint_key);
    info!("  Resync interval: {}s", config.resync_interval_secs);
    info!("  Retry attempts: {}", config.max_retry_attempts);
    info!("  Conflict retry attempts: {}", config.conflict_retry_attempts);
    info!("  Manifest fallback: {:?}", config.manifest_fallback());

    let client = init_kube_client(config.kubeconfig.as_deref()).await?;

    match command.unwrap_or(Command::Run) {
        Command::Run => {
            let token = CancellationToken::new();
            tokio::spawn(shutdown_signal(token.clone()));

            let reconciler = Arc::new(build_reconciler(&config, client)?);
            Controller::new(&config, reconciler, token).run().await?;
        }
        Command::Clean => {
            let nodes = KubeStore::<Node>::new(client.clone());
            let pods = KubeStore::<Pod>::new(client);
            let report = clean::clean(
                &nodes,
                &pods,
                &config.taint_key,
                config.conflict_retry_attempts,
            )
            .await?;
            if report.failures > 0 {
                anyhow::bail!("clean finished with {} failure(s)", report.failures);
            }
        }
    }

    Ok(())
}

/// Initialise tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
