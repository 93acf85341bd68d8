//! Unit tests for node taint reconciliation

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::node::*;
    use crate::store::StoreError;
    use crate::test_utils::*;
    use registry_client::MockRegistryClient;
    use std::sync::Arc;

    fn harness(nodes: Vec<k8s_openapi::api::core::v1::Node>) -> TestHarness {
        TestHarness::new(nodes, Vec::new(), MockRegistryClient::new())
    }

    #[test]
    fn test_ensure_taint_adds_when_missing() {
        let mut taints = vec![taint("dedicated", "gpu", "NoExecute")];
        assert!(ensure_architecture_taint(&mut taints, TEST_TAINT_KEY, "arm64"));
        assert_eq!(taints.len(), 2);
        assert!(taints.iter().any(|t| t.key == "dedicated"));
        assert!(
            taints
                .iter()
                .any(|t| t.key == TEST_TAINT_KEY && t.value.as_deref() == Some("arm64") && t.effect == "NoSchedule")
        );
    }

    #[test]
    fn test_ensure_taint_keeps_matching_taint() {
        let mut taints = vec![taint(TEST_TAINT_KEY, "amd64", "NoSchedule")];
        assert!(!ensure_architecture_taint(&mut taints, TEST_TAINT_KEY, "amd64"));
        assert_eq!(taints, vec![taint(TEST_TAINT_KEY, "amd64", "NoSchedule")]);
    }

    #[test]
    fn test_ensure_taint_replaces_mismatched_taints() {
        let mut taints = vec![
            taint(TEST_TAINT_KEY, "amd64", "NoSchedule"),
            taint("zone", "a", "PreferNoSchedule"),
            taint(TEST_TAINT_KEY, "ppc64le", "NoSchedule"),
        ];
        assert!(ensure_architecture_taint(&mut taints, TEST_TAINT_KEY, "arm64"));

        let arch: Vec<_> = taints.iter().filter(|t| t.key == TEST_TAINT_KEY).collect();
        assert_eq!(arch.len(), 1);
        assert_eq!(arch[0].value.as_deref(), Some("arm64"));
        assert!(taints.iter().any(|t| t.key == "zone"));
    }

    #[test]
    fn test_ensure_taint_drops_stale_alongside_matching() {
        let mut taints = vec![
            taint(TEST_TAINT_KEY, "s390x", "NoSchedule"),
            taint(TEST_TAINT_KEY, "arm64", "NoSchedule"),
        ];
        assert!(ensure_architecture_taint(&mut taints, TEST_TAINT_KEY, "arm64"));
        assert_eq!(taints, vec![taint(TEST_TAINT_KEY, "arm64", "NoSchedule")]);
    }

    #[test]
    fn test_node_architecture_missing() {
        let mut node = create_test_node("n1", "", Vec::new());
        assert_eq!(node_architecture(&node), None);
        node.status = None;
        assert_eq!(node_architecture(&node), None);
    }

    #[tokio::test]
    async fn test_reconcile_node_adds_taint() {
        let node = create_test_node("worker-1", "arm64", Vec::new());
        let h = harness(vec![node.clone()]);

        h.reconciler.reconcile_node(&node).await.unwrap();

        let stored = h.nodes.object(None, "worker-1").unwrap();
        let taints = arch_taints(&stored);
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].value.as_deref(), Some("arm64"));
        assert_eq!(taints[0].effect, "NoSchedule");
        assert_eq!(h.nodes.update_count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_node_is_idempotent() {
        let node = create_test_node(
            "worker-1",
            "amd64",
            vec![taint(TEST_TAINT_KEY, "amd64", "NoSchedule")],
        );
        let h = harness(vec![node.clone()]);
        h.nodes.forbid_updates();

        h.reconciler.reconcile_node(&node).await.unwrap();
        h.reconciler.reconcile_node(&node).await.unwrap();

        assert_eq!(h.nodes.update_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_node_converges_from_mismatched_taints() {
        let node = create_test_node(
            "worker-1",
            "arm64",
            vec![
                taint(TEST_TAINT_KEY, "amd64", "NoSchedule"),
                taint(TEST_TAINT_KEY, "ppc64le", "NoSchedule"),
                taint(TEST_TAINT_KEY, "s390x", "NoSchedule"),
                taint("node-role.kubernetes.io/control-plane", "", "NoSchedule"),
            ],
        );
        let h = harness(vec![node.clone()]);

        h.reconciler.reconcile_node(&node).await.unwrap();

        let stored = h.nodes.object(None, "worker-1").unwrap();
        let taints = arch_taints(&stored);
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].value.as_deref(), Some("arm64"));
        let all = stored.spec.unwrap().taints.unwrap();
        assert!(all.iter().any(|t| t.key == "node-role.kubernetes.io/control-plane"));

        // A second pass finds nothing to do
        h.nodes.forbid_updates();
        h.reconciler.reconcile_node(&node).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_node_uses_current_version_not_event_snapshot() {
        let snapshot = create_test_node("worker-1", "arm64", Vec::new());
        let h = harness(vec![snapshot.clone()]);
        // Someone else taints the node after the event was delivered
        h.nodes.insert(create_test_node(
            "worker-1",
            "arm64",
            vec![taint(TEST_TAINT_KEY, "arm64", "NoSchedule")],
        ));
        h.nodes.forbid_updates();

        h.reconciler.reconcile_node(&snapshot).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_node_retries_conflicts() {
        let node = create_test_node("worker-1", "arm64", Vec::new());
        let h = harness(vec![node.clone()]);
        h.nodes.conflict_next(3);

        h.reconciler.reconcile_node(&node).await.unwrap();

        assert_eq!(h.nodes.update_count(), 1);
        assert_eq!(arch_taints(&h.nodes.object(None, "worker-1").unwrap()).len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_node_gives_up_after_conflict_ceiling() {
        let node = create_test_node("worker-1", "arm64", Vec::new());
        let h = harness(vec![node.clone()]);
        h.nodes.conflict_next(5);

        let err = h.reconciler.reconcile_node(&node).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(h.nodes.update_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_node_without_architecture_fails() {
        let node = create_test_node("worker-1", "", Vec::new());
        let h = harness(vec![node.clone()]);

        let err = h.reconciler.reconcile_node(&node).await.unwrap_err();

        assert!(matches!(err, ControllerError::MissingField(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_reconcile_deleted_node_is_not_found() {
        let node = create_test_node("gone", "amd64", Vec::new());
        let h = harness(Vec::new());

        let err = h.reconciler.reconcile_node(&node).await.unwrap_err();

        assert!(matches!(err, ControllerError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_node_reconciliations_converge() {
        let node = create_test_node(
            "worker-1",
            "arm64",
            vec![taint(TEST_TAINT_KEY, "amd64", "NoSchedule")],
        );
        let h = harness(vec![node.clone()]);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let reconciler = Arc::clone(&h.reconciler);
            let node = node.clone();
            handles.push(tokio::spawn(async move { reconciler.reconcile_node(&node).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let taints = arch_taints(&h.nodes.object(None, "worker-1").unwrap());
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].value.as_deref(), Some("arm64"));
        assert_eq!(h.nodes.update_count(), 1);
    }
}
