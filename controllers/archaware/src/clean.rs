//! Removes every architecture taint and toleration from the cluster.
//!
//! Tolerations cannot be removed from a running pod, so pods carrying
//! architecture tolerations are deleted and left for their owners to
//! recreate. Node taints are removed in place.

use crate::error::ControllerError;
use crate::reconcile_helpers::retry_on_conflict;
use crate::store::{ObjectStore, object_key};
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{error, info, warn};

/// Outcome of a clean sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub pods_deleted: usize,
    pub nodes_cleaned: usize,
    pub failures: usize,
}

fn has_architecture_toleration(pod: &Pod, key: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.tolerations.as_ref())
        .is_some_and(|tolerations| tolerations.iter().any(|t| t.key.as_deref() == Some(key)))
}

fn has_architecture_taint(node: &Node, key: &str) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .is_some_and(|taints| taints.iter().any(|t| t.key == key))
}

/// Delete pods with architecture tolerations and strip architecture taints
/// from nodes.
///
/// Failing to list either kind aborts the sweep. Failures on individual
/// objects are logged, counted and skipped.
pub async fn clean(
    nodes: &dyn ObjectStore<Node>,
    pods: &dyn ObjectStore<Pod>,
    taint_key: &str,
    conflict_retry_attempts: u32,
) -> Result<CleanReport, ControllerError> {
    let mut report = CleanReport::default();

    info!("Removing architecture tolerations from pods");
    for pod in pods.list().await? {
        if !has_architecture_toleration(&pod, taint_key) {
            continue;
        }
        let key = object_key(&pod);
        if pod.metadata.owner_references.as_ref().is_none_or(Vec::is_empty) {
            warn!(pod = %key, "Pod has no owner and will not be recreated");
        }

        let name = pod.metadata.name.as_deref().unwrap_or_default();
        match pods.delete(pod.metadata.namespace.as_deref(), name).await {
            Ok(()) => {
                info!(pod = %key, "Deleted pod carrying architecture tolerations");
                report.pods_deleted += 1;
            }
            Err(e) => {
                error!(pod = %key, error = %e, "Failed to delete pod");
                report.failures += 1;
            }
        }
    }

    info!("Removing architecture taints from nodes");
    for node in nodes.list().await? {
        if !has_architecture_taint(&node, taint_key) {
            continue;
        }
        let name = node.metadata.name.as_deref().unwrap_or_default();

        let result = retry_on_conflict(conflict_retry_attempts, |_| async move {
            let mut current = nodes.get(None, name).await?;
            let Some(taints) = current.spec.as_mut().and_then(|spec| spec.taints.as_mut()) else {
                return Ok(false);
            };
            let before = taints.len();
            taints.retain(|t| t.key != taint_key);
            if taints.len() == before {
                return Ok(false);
            }
            nodes.replace(&current).await?;
            Ok(true)
        })
        .await;

        match result {
            Ok(true) => {
                info!(node = name, "Removed architecture taints");
                report.nodes_cleaned += 1;
            }
            Ok(false) => {}
            Err(e) => {
                error!(node = name, error = %e, "Failed to remove architecture taints");
                report.failures += 1;
            }
        }
    }

    info!(
        pods_deleted = report.pods_deleted,
        nodes_cleaned = report.nodes_cleaned,
        failures = report.failures,
        "Clean finished"
    );
    Ok(report)
}
