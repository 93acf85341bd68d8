//! Test utilities for unit testing reconcilers
//!
//! This module provides an in-memory [`ObjectStore`] with resource versions,
//! conflict injection and update counting, plus helpers for creating test
//! nodes and pods.

use crate::reconcile_helpers::NO_SCHEDULE;
use crate::reconciler::Reconciler;
use crate::store::{ClusterObject, ObjectStore, StoreError, WatchNotification};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{
    Container, Node, NodeSpec, NodeStatus, NodeSystemInfo, Pod, PodSpec, Taint, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use registry_client::{ArchitectureResolver, MockRegistryClient};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const TEST_TAINT_KEY: &str = "supported-arch";

pub type ObjectRef = (Option<String>, String);

struct MockState<K> {
    objects: BTreeMap<ObjectRef, K>,
    next_version: u64,
    updates: u32,
    pending_conflicts: u32,
    forbid_updates: bool,
    fail_watch: bool,
    deleted: Vec<ObjectRef>,
}

/// In-memory object store for testing
///
/// Every stored object carries a resource version. `replace` succeeds only
/// when the submitted object's version matches the stored one, mirroring the
/// API server's optimistic concurrency.
pub struct MockStore<K> {
    state: Mutex<MockState<K>>,
    watchers: Mutex<Vec<UnboundedSender<WatchNotification<K>>>>,
}

impl<K: ClusterObject> MockStore<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                objects: BTreeMap::new(),
                next_version: 1,
                updates: 0,
                pending_conflicts: 0,
                forbid_updates: false,
                fail_watch: false,
                deleted: Vec::new(),
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Arc<Self> {
        let store = Self::new();
        for object in objects {
            store.insert(object);
        }
        Arc::new(store)
    }

    /// Store `object`, assigning it a fresh resource version.
    pub fn insert(&self, mut object: K) -> K {
        let mut state = self.state.lock().unwrap();
        object.meta_mut().resource_version = Some(state.next_version.to_string());
        state.next_version += 1;
        state.objects.insert(object_ref(&object), object.clone());
        object
    }

    pub fn object(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(namespace.map(str::to_string), name.to_string()))
            .cloned()
    }

    /// Number of successful `replace` calls.
    pub fn update_count(&self) -> u32 {
        self.state.lock().unwrap().updates
    }

    /// Make the next `count` `replace` calls fail with a conflict.
    pub fn conflict_next(&self, count: u32) {
        self.state.lock().unwrap().pending_conflicts = count;
    }

    /// Panic on any `replace` call.
    pub fn forbid_updates(&self) {
        self.state.lock().unwrap().forbid_updates = true;
    }

    /// Make `watch` fail.
    pub fn fail_watch(&self) {
        self.state.lock().unwrap().fail_watch = true;
    }

    pub fn deleted(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Deliver a notification to every open watch stream.
    pub fn emit(&self, notification: WatchNotification<K>) {
        let watchers = self.watchers.lock().unwrap();
        for tx in watchers.iter() {
            let _ = tx.unbounded_send(notification.clone());
        }
    }

    /// Close every open watch stream.
    pub fn close_watches(&self) {
        self.watchers.lock().unwrap().clear();
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }
}

fn object_ref<K: ClusterObject>(object: &K) -> ObjectRef {
    let meta = object.meta();
    (meta.namespace.clone(), meta.name.clone().unwrap_or_default())
}

#[async_trait]
impl<K: ClusterObject> ObjectStore<K> for MockStore<K> {
    async fn list(&self) -> Result<Vec<K>, StoreError> {
        Ok(self.state.lock().unwrap().objects.values().cloned().collect())
    }

    async fn watch(&self) -> Result<BoxStream<'static, WatchNotification<K>>, StoreError> {
        if self.state.lock().unwrap().fail_watch {
            return Err(StoreError::NotFound("watch endpoint unavailable".to_string()));
        }
        let (tx, rx) = unbounded();
        self.watchers.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        self.object(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("{} {} not found", K::KIND, name)))
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let mut state = self.state.lock().unwrap();
        assert!(
            !state.forbid_updates,
            "unexpected update of {} {:?}",
            K::KIND,
            object.meta().name
        );
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        let key = object_ref(object);
        let stored_version = state
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{} {} not found", K::KIND, key.1)))?
            .meta()
            .resource_version
            .clone();
        if stored_version != object.meta().resource_version {
            return Err(StoreError::Conflict(format!(
                "{} {} has been modified",
                K::KIND,
                key.1
            )));
        }

        let mut updated = object.clone();
        updated.meta_mut().resource_version = Some(state.next_version.to_string());
        state.next_version += 1;
        state.updates += 1;
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let key = (namespace.map(str::to_string), name.to_string());
        let mut state = self.state.lock().unwrap();
        if state.objects.remove(&key).is_none() {
            return Err(StoreError::NotFound(format!("{} {} not found", K::KIND, name)));
        }
        state.deleted.push(key);
        Ok(())
    }
}

/// Helper to create a test node reporting `architecture`
pub fn create_test_node(name: &str, architecture: &str, taints: Vec<Taint>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            taints: if taints.is_empty() { None } else { Some(taints) },
            ..Default::default()
        }),
        status: Some(NodeStatus {
            node_info: Some(NodeSystemInfo {
                architecture: architecture.to_string(),
                operating_system: "linux".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// Helper to create a test pod with one container per image
pub fn create_test_pod(
    namespace: &str,
    name: &str,
    images: &[&str],
    tolerations: Vec<Toleration>,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: images
                .iter()
                .enumerate()
                .map(|(i, image)| Container {
                    name: format!("c{i}"),
                    image: Some((*image).to_string()),
                    ..Default::default()
                })
                .collect(),
            tolerations: if tolerations.is_empty() {
                None
            } else {
                Some(tolerations)
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn taint(key: &str, value: &str, effect: &str) -> Taint {
    Taint {
        key: key.to_string(),
        value: Some(value.to_string()),
        effect: effect.to_string(),
        time_added: None,
    }
}

pub fn toleration(key: &str, value: &str) -> Toleration {
    Toleration {
        key: Some(key.to_string()),
        value: Some(value.to_string()),
        effect: Some(NO_SCHEDULE.to_string()),
        operator: Some("Equal".to_string()),
        toleration_seconds: None,
    }
}

/// Architecture-key taints on a stored node
pub fn arch_taints(node: &Node) -> Vec<Taint> {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|t| t.key == TEST_TAINT_KEY)
        .collect()
}

/// Architecture values tolerated by a stored pod
pub fn tolerated_architectures(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.tolerations.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|t| t.key.as_deref() == Some(TEST_TAINT_KEY))
        .filter_map(|t| t.value)
        .collect()
}

/// Test fixture wiring a [`Reconciler`] to mock stores and a mock registry
pub struct TestHarness {
    pub nodes: Arc<MockStore<Node>>,
    pub pods: Arc<MockStore<Pod>>,
    pub registry: MockRegistryClient,
    pub reconciler: Arc<Reconciler>,
}

impl TestHarness {
    pub fn new(nodes: Vec<Node>, pods: Vec<Pod>, registry: MockRegistryClient) -> Self {
        let nodes = MockStore::with_objects(nodes);
        let pods = MockStore::with_objects(pods);
        let resolver = ArchitectureResolver::new(Arc::new(registry.clone()));
        let reconciler = Arc::new(Reconciler::new(
            nodes.clone(),
            pods.clone(),
            Arc::new(resolver),
            TEST_TAINT_KEY.to_string(),
            5,
        ));
        Self {
            nodes,
            pods,
            registry,
            reconciler,
        }
    }
}
