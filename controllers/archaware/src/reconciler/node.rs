//! Node architecture taint reconciliation.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{NO_SCHEDULE, retry_on_conflict};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Taint};
use tracing::{debug, info};

/// Architecture the node reports in its system info, if any.
pub fn node_architecture(node: &Node) -> Option<&str> {
    node.status
        .as_ref()
        .and_then(|status| status.node_info.as_ref())
        .map(|info| info.architecture.as_str())
        .filter(|arch| !arch.is_empty())
}

/// Make `taints` carry exactly one `key` taint, valued `architecture`.
///
/// Taints with other keys are left alone. A matching taint already present
/// is kept as is; any other `key` taint is removed. Returns whether the
/// list changed.
pub fn ensure_architecture_taint(taints: &mut Vec<Taint>, key: &str, architecture: &str) -> bool {
    let before = taints.len();
    let mut kept_match = false;
    taints.retain(|taint| {
        if taint.key != key {
            return true;
        }
        if !kept_match && taint.value.as_deref() == Some(architecture) {
            kept_match = true;
            return true;
        }
        false
    });

    if kept_match {
        return taints.len() != before;
    }
    taints.push(Taint {
        key: key.to_string(),
        value: Some(architecture.to_string()),
        effect: NO_SCHEDULE.to_string(),
        time_added: None,
    });
    true
}

impl Reconciler {
    /// Reconcile a node's architecture taint.
    ///
    /// Re-reads the node before each write and retries immediately on a
    /// write conflict. A node already carrying the correct taint is never
    /// written.
    pub async fn reconcile_node(&self, node: &Node) -> Result<(), ControllerError> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::MissingField("node metadata.name".to_string()))?;

        info!("Reconciling node {}", name);

        let updated = retry_on_conflict(self.conflict_retry_attempts, |attempt| async move {
            let mut current = self.nodes.get(None, name).await?;
            let architecture = node_architecture(&current)
                .ok_or_else(|| {
                    ControllerError::MissingField(format!(
                        "status.nodeInfo.architecture on node {name}"
                    ))
                })?
                .to_string();

            let taints = current
                .spec
                .get_or_insert_with(NodeSpec::default)
                .taints
                .get_or_insert_with(Vec::new);
            if !ensure_architecture_taint(taints, &self.taint_key, &architecture) {
                return Ok(None);
            }

            self.nodes.replace(&current).await?;
            Ok(Some((architecture, attempt)))
        })
        .await?;

        match updated {
            Some((architecture, attempts)) => info!(
                node = name,
                architecture = %architecture,
                attempts,
                "Set architecture taint on node"
            ),
            None => debug!(node = name, "Node architecture taint already up to date"),
        }
        Ok(())
    }
}
