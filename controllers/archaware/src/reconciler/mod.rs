//! Reconciliation logic for nodes and pods.
//!
//! - `node`: keeps exactly one architecture taint on every node
//! - `pod`: adds architecture tolerations to pods whose images support them

pub mod node;
pub mod pod;

#[cfg(test)]
mod node_test;

use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::{Node, Pod};
use registry_client::ArchitectureResolver;
use std::sync::Arc;

/// Reconciles node taints and pod tolerations against architectures.
pub struct Reconciler {
    pub(crate) nodes: Arc<dyn ObjectStore<Node>>,
    pub(crate) pods: Arc<dyn ObjectStore<Pod>>,
    pub(crate) resolver: Arc<ArchitectureResolver>,
    /// Key shared by architecture taints and tolerations
    pub(crate) taint_key: String,
    /// Immediate re-read-and-write attempts on a write conflict
    pub(crate) conflict_retry_attempts: u32,
}

impl Reconciler {
    pub fn new(
        nodes: Arc<dyn ObjectStore<Node>>,
        pods: Arc<dyn ObjectStore<Pod>>,
        resolver: Arc<ArchitectureResolver>,
        taint_key: String,
        conflict_retry_attempts: u32,
    ) -> Self {
        Self {
            nodes,
            pods,
            resolver,
            taint_key,
            conflict_retry_attempts,
        }
    }
}
