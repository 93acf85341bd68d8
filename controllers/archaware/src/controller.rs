//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the object
//! stores, registry resolver and reconciler together and runs one control
//! loop per watched kind:
//! - Node: keeps the architecture taint in line with the node's CPU
//! - Pod: tolerates every architecture all of the pod's images support

use crate::backoff::ExponentialBackoff;
use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::{LoopSettings, Watcher};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use registry_client::{ArchitectureResolver, RegistryClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Build a Kubernetes client.
///
/// Discovery order: explicit kubeconfig path (flag or `KUBECONFIG`), then
/// `~/.kube/config` if it exists, then the in-cluster service account.
pub async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, ControllerError> {
    let path = kubeconfig.map(Path::to_path_buf).or_else(default_kubeconfig);

    let Some(path) = path else {
        info!("No kubeconfig found, using in-cluster configuration");
        return Ok(Client::try_default().await?);
    };

    info!("Loading kubeconfig from {}", path.display());
    let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
        ControllerError::InvalidConfig(format!("failed to read kubeconfig {}: {e}", path.display()))
    })?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("invalid kubeconfig: {e}")))?;
    Ok(Client::try_from(config)?)
}

fn default_kubeconfig() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let path = PathBuf::from(home).join(".kube").join("config");
    path.exists().then_some(path)
}

/// Build the reconciler shared by both control loops.
pub fn build_reconciler(config: &Config, client: Client) -> Result<Reconciler, ControllerError> {
    let registry = RegistryClient::new(config.registry_timeout())?;
    let resolver = ArchitectureResolver::new(Arc::new(registry))
        .with_fallback(config.manifest_fallback());

    Ok(Reconciler::new(
        Arc::new(KubeStore::<Node>::new(client.clone())),
        Arc::new(KubeStore::<Pod>::new(client)),
        Arc::new(resolver),
        config.taint_key.clone(),
        config.conflict_retry_attempts,
    ))
}

/// Main controller running the node and pod control loops.
pub struct Controller {
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    pod_watcher: JoinHandle<Result<(), ControllerError>>,
    token: CancellationToken,
}

impl Controller {
    /// Spawn both control loops.
    pub fn new(config: &Config, reconciler: Arc<Reconciler>, token: CancellationToken) -> Self {
        info!("Initializing archaware controller");

        let settings = LoopSettings {
            resync_interval: config.resync_interval(),
            backoff: ExponentialBackoff::new(Duration::from_secs(1), config.max_retry_attempts),
        };
        let watcher = Arc::new(Watcher::new(reconciler, settings));

        let node_watcher = {
            let watcher = watcher.clone();
            let token = token.clone();
            tokio::spawn(async move { watcher.watch_nodes(token).await })
        };

        let pod_watcher = {
            let token = token.clone();
            tokio::spawn(async move { watcher.watch_pods(token).await })
        };

        Self {
            node_watcher,
            pod_watcher,
            token,
        }
    }

    /// Runs the controller until shutdown.
    ///
    /// Both loops return once the token is cancelled. If either loop fails,
    /// the other is cancelled and the error is returned.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("archaware controller running");

        let (first, remaining, remaining_kind) = tokio::select! {
            result = &mut self.node_watcher => (flatten("Node", result), self.pod_watcher, "Pod"),
            result = &mut self.pod_watcher => (flatten("Pod", result), self.node_watcher, "Node"),
        };

        if let Err(e) = first {
            error!("Control loop failed, shutting down: {}", e);
            self.token.cancel();
            let _ = flatten(remaining_kind, remaining.await);
            return Err(e);
        }

        flatten(remaining_kind, remaining.await)?;
        info!("archaware controller stopped");
        Ok(())
    }
}

fn flatten(
    kind: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{kind} watcher panicked: {e}")))?
}
