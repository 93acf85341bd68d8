//! Pod architecture toleration reconciliation.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{NO_SCHEDULE, intersection, retry_on_conflict};
use k8s_openapi::api::core::v1::{Pod, PodSpec, Toleration};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Image reference of every container in the pod.
pub fn container_images(pod: &Pod) -> Result<Vec<&str>, ControllerError> {
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();
    containers
        .iter()
        .map(|container| {
            container.image.as_deref().ok_or_else(|| {
                ControllerError::MissingField(format!("image of container {}", container.name))
            })
        })
        .collect()
}

/// Architectures in `supported` with no `key` toleration yet.
///
/// The result is deduplicated and keeps the order of `supported`.
pub fn missing_architectures(
    existing: &[Toleration],
    key: &str,
    supported: &[String],
) -> Vec<String> {
    let mut seen: HashSet<&str> = existing
        .iter()
        .filter(|t| t.key.as_deref() == Some(key))
        .filter_map(|t| t.value.as_deref())
        .collect();

    supported
        .iter()
        .filter(|arch| seen.insert(arch.as_str()))
        .cloned()
        .collect()
}

/// Toleration for `key=architecture:NoSchedule`.
pub fn architecture_toleration(key: &str, architecture: &str) -> Toleration {
    Toleration {
        key: Some(key.to_string()),
        operator: Some("Equal".to_string()),
        value: Some(architecture.to_string()),
        effect: Some(NO_SCHEDULE.to_string()),
        toleration_seconds: None,
    }
}

impl Reconciler {
    /// Reconcile a pod's architecture tolerations.
    ///
    /// Resolves the architectures of every container image, intersects them
    /// and adds one toleration per common architecture the pod does not yet
    /// tolerate. Existing tolerations are never removed.
    pub async fn reconcile_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::MissingField("pod metadata.name".to_string()))?;
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ControllerError::MissingField("pod metadata.namespace".to_string()))?;

        info!("Reconciling pod {}/{}", namespace, name);

        let images = container_images(pod)?;
        let mut per_container = Vec::with_capacity(images.len());
        for image in &images {
            let architectures = self.resolver.resolve(image).await?;
            debug!(image = %image, architectures = ?architectures, "Resolved image architectures");
            per_container.push(architectures);
        }

        let supported = intersection(&per_container);
        if supported.is_empty() {
            if !images.is_empty() {
                warn!(
                    pod = %format!("{namespace}/{name}"),
                    images = ?images,
                    "Containers share no architecture, leaving tolerations unchanged"
                );
            }
            return Ok(());
        }

        let existing = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.tolerations.as_deref())
            .unwrap_or_default();
        if missing_architectures(existing, &self.taint_key, &supported).is_empty() {
            info!("Pod {}/{} tolerations up to date, doing nothing", namespace, name);
            return Ok(());
        }

        let supported = &supported;
        let (added, attempts) =
            retry_on_conflict(self.conflict_retry_attempts, |attempt| async move {
                let mut current = self.pods.get(Some(namespace), name).await?;
                let tolerations = current
                    .spec
                    .get_or_insert_with(PodSpec::default)
                    .tolerations
                    .get_or_insert_with(Vec::new);

                let missing = missing_architectures(tolerations, &self.taint_key, supported);
                if missing.is_empty() {
                    return Ok((missing, attempt));
                }
                tolerations.extend(
                    missing
                        .iter()
                        .map(|arch| architecture_toleration(&self.taint_key, arch)),
                );

                self.pods.replace(&current).await?;
                Ok((missing, attempt))
            })
            .await?;

        if added.is_empty() {
            debug!(pod = %format!("{namespace}/{name}"), "Tolerations added concurrently, nothing to write");
        } else {
            info!(
                pod = %format!("{namespace}/{name}"),
                architectures = ?added,
                attempts,
                "Added architecture tolerations to pod"
            );
        }
        Ok(())
    }
}
