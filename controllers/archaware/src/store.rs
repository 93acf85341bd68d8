//! Cluster object store.
//!
//! Reconcilers read and write nodes and pods through [`ObjectStore`] rather
//! than `kube::Api` directly so the reconciliation logic can run against
//! [`crate::test_utils::MockStore`] in unit tests. [`KubeStore`] is the
//! production implementation backed by the Kubernetes API.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event, watcher};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;

/// Errors returned by an [`ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object changed since it was read (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The object no longer exists (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other Kubernetes API failure
    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),

    /// The object could not be decoded or addressed
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 409 => {
                StoreError::Conflict(resp.message.to_string())
            }
            kube::Error::Api(ref resp) if resp.code == 404 => {
                StoreError::NotFound(resp.message.to_string())
            }
            other => StoreError::Kube(other),
        }
    }
}

/// A typed notification from a watch stream.
///
/// `Added` carries objects from an initial or recovery listing, `Modified`
/// carries live changes. Watch failures surface as
/// [`WatchNotification::Error`] instead of being handed to a reconciler.
#[derive(Debug, Clone)]
pub enum WatchNotification<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    Error(String),
}

/// Kubernetes object kinds the controller manages.
pub trait ClusterObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Human-readable kind used in log messages
    const KIND: &'static str;

    /// Build an API handle, scoped to `namespace` when the kind is namespaced.
    fn api(client: &Client, namespace: Option<&str>) -> Api<Self>;
}

impl ClusterObject for Node {
    const KIND: &'static str = "node";

    fn api(client: &Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client.clone())
    }
}

impl ClusterObject for Pod {
    const KIND: &'static str = "pod";

    fn api(client: &Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        }
    }
}

/// Read, write and watch access to one kind of cluster object.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// List every object of this kind across all namespaces.
    async fn list(&self) -> Result<Vec<K>, StoreError>;

    /// Open a watch stream over every object of this kind.
    ///
    /// Fails when the kind cannot be read at all. Once open, the stream
    /// recovers from expired or broken connections on its own.
    async fn watch(&self) -> Result<BoxStream<'static, WatchNotification<K>>, StoreError>;

    /// Fetch the current version of an object.
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError>;

    /// Replace an object. Fails with [`StoreError::Conflict`] when the
    /// object's resource version is stale.
    async fn replace(&self, object: &K) -> Result<K, StoreError>;

    /// Delete an object.
    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: ClusterObject> ObjectStore<K> for KubeStore<K> {
    async fn list(&self) -> Result<Vec<K>, StoreError> {
        let list = K::api(&self.client, None)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn watch(&self) -> Result<BoxStream<'static, WatchNotification<K>>, StoreError> {
        let api = K::api(&self.client, None);
        // Surface RBAC or connectivity problems to the caller before streaming
        api.list(&ListParams::default().limit(1)).await?;

        Ok(watcher(api, watcher::Config::default())
            .default_backoff()
            .filter_map(|event| futures::future::ready(decode_event(event)))
            .boxed())
    }

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        Ok(K::api(&self.client, namespace).get(name).await?)
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let name = object
            .meta()
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Decode(format!("{} has no name", K::KIND)))?;
        let namespace = object.namespace();
        Ok(K::api(&self.client, namespace.as_deref())
            .replace(name, &PostParams::default(), object)
            .await?)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        K::api(&self.client, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

/// Map a watcher event onto a [`WatchNotification`].
///
/// The watcher resumes from the last seen resource version after a
/// connection expires and only relists on `410 Gone`, so listing markers
/// carry no objects and are dropped.
fn decode_event<K>(
    event: Result<Event<K>, watcher::Error>,
) -> Option<WatchNotification<K>> {
    match event {
        Ok(Event::InitApply(obj)) => Some(WatchNotification::Added(obj)),
        Ok(Event::Apply(obj)) => Some(WatchNotification::Modified(obj)),
        Ok(Event::Delete(obj)) => Some(WatchNotification::Deleted(obj)),
        Ok(Event::Init | Event::InitDone) => None,
        Err(err) => Some(WatchNotification::Error(err.to_string())),
    }
}

/// `namespace/name` for namespaced objects, `name` otherwise.
pub fn object_key<K: Resource>(object: &K) -> String {
    let name = object.meta().name.as_deref().unwrap_or("<unnamed>");
    match object.meta().namespace.as_deref() {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}
