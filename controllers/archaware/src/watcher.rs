//! Kubernetes resource watchers.
//!
//! Each watched kind runs one control loop that multiplexes three triggers:
//! a watch stream, a periodic resync ticker and the process cancellation
//! token. Every added or modified object is reconciled in its own task,
//! wrapped in the exponential backoff retrier. A resync pass lists every
//! object, reconciles them all concurrently and waits for the whole pass
//! before the ticker restarts.

use crate::backoff::{ExponentialBackoff, retry_on_error};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::{ClusterObject, ObjectStore, WatchNotification, object_key};
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Future returned by a reconcile function.
pub type ReconcileFuture = Pin<Box<dyn Future<Output = Result<(), ControllerError>> + Send>>;

/// Delay before re-opening a watch stream that could not be re-established.
const REWATCH_DELAY: Duration = Duration::from_secs(5);

/// Timing for a control loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub resync_interval: Duration,
    pub backoff: ExponentialBackoff,
}

/// Generic control loop for one kind of object.
///
/// Fails only if the initial watch stream cannot be opened. Returns `Ok`
/// once `token` is cancelled.
pub async fn watch_resource<K, C, F>(
    store: Arc<dyn ObjectStore<K>>,
    ctx: Arc<C>,
    reconcile_fn: F,
    settings: LoopSettings,
    token: CancellationToken,
) -> Result<(), ControllerError>
where
    K: ClusterObject,
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", K::KIND);

    let mut events = store.watch().await.map_err(|e| {
        ControllerError::Watch(format!("failed to open {} watch stream: {e}", K::KIND))
    })?;

    let mut resync = tokio::time::interval_at(
        Instant::now() + settings.resync_interval,
        settings.resync_interval,
    );
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => {
                info!("Stopping {} watcher", K::KIND);
                return Ok(());
            }
            event = events.next() => match event {
                Some(WatchNotification::Added(obj) | WatchNotification::Modified(obj)) => {
                    debug!("Dispatching reconciliation for {} {}", K::KIND, object_key(&obj));
                    // Watch-triggered units are not awaited
                    drop(spawn_unit(&ctx, &reconcile_fn, obj, &settings.backoff, &token));
                }
                Some(WatchNotification::Deleted(obj)) => {
                    debug!("{} {} deleted, nothing to reconcile", K::KIND, object_key(&obj));
                }
                Some(WatchNotification::Error(message)) => {
                    error!(kind = K::KIND, error = %message, "Watch stream reported an error");
                }
                None => match reopen_watch(store.as_ref(), &token).await {
                    Some(stream) => events = stream,
                    None => {
                        info!("Stopping {} watcher", K::KIND);
                        return Ok(());
                    }
                },
            },
            _ = resync.tick() => {
                resync_all(store.as_ref(), &ctx, &reconcile_fn, &settings.backoff, &token).await;
                // Next pass starts a full interval after this one finished
                resync.reset();
            }
        }
    }
}

/// Re-open a watch stream that ended.
///
/// [`ObjectStore::watch`] streams recover from dropped connections
/// themselves, so this only runs when a stream terminates outright.
/// Returns `None` on cancellation.
async fn reopen_watch<K: ClusterObject>(
    store: &dyn ObjectStore<K>,
    token: &CancellationToken,
) -> Option<BoxStream<'static, WatchNotification<K>>> {
    warn!("{} watch stream ended, re-opening", K::KIND);
    loop {
        match store.watch().await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                error!(kind = K::KIND, error = %e, "Failed to re-open watch stream");
                tokio::select! {
                    () = token.cancelled() => return None,
                    () = tokio::time::sleep(REWATCH_DELAY) => {}
                }
            }
        }
    }
}

/// List every object and reconcile all of them, waiting for the whole pass.
async fn resync_all<K, C, F>(
    store: &dyn ObjectStore<K>,
    ctx: &Arc<C>,
    reconcile_fn: &F,
    backoff: &ExponentialBackoff,
    token: &CancellationToken,
) where
    K: ClusterObject,
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    let objects = match store.list().await {
        Ok(objects) => objects,
        Err(e) => {
            error!(kind = K::KIND, error = %e, "Failed to list objects for resync");
            return;
        }
    };

    info!("Resyncing {} {}(s)", objects.len(), K::KIND);
    let units: Vec<_> = objects
        .into_iter()
        .map(|obj| spawn_unit(ctx, reconcile_fn, obj, backoff, token))
        .collect();

    for result in join_all(units).await {
        if let Err(e) = result {
            error!(kind = K::KIND, error = %e, "Reconciliation task panicked");
        }
    }
    debug!("{} resync pass complete", K::KIND);
}

/// Reconcile one object in its own task under the backoff retrier.
fn spawn_unit<K, C, F>(
    ctx: &Arc<C>,
    reconcile_fn: &F,
    obj: K,
    backoff: &ExponentialBackoff,
    token: &CancellationToken,
) -> JoinHandle<()>
where
    K: ClusterObject,
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    let ctx = Arc::clone(ctx);
    let reconcile_fn = reconcile_fn.clone();
    let backoff = backoff.clone();
    let token = token.clone();
    let obj = Arc::new(obj);

    tokio::spawn(async move {
        let key = object_key(obj.as_ref());
        let (attempts, result) =
            retry_on_error(&token, &backoff, ControllerError::is_retryable, || {
                reconcile_fn(Arc::clone(&ctx), Arc::clone(&obj))
            })
            .await;

        match result {
            Ok(()) => debug!(kind = K::KIND, object = %key, attempts, "Reconciled"),
            Err(ControllerError::Cancelled) => {
                debug!(kind = K::KIND, object = %key, attempts, "Reconciliation cancelled");
            }
            Err(e) => error!(
                kind = K::KIND,
                object = %key,
                attempts,
                error = %e,
                "Reconciliation failed"
            ),
        }
    })
}

/// Watches nodes and pods and feeds them to the [`Reconciler`].
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    settings: LoopSettings,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, settings: LoopSettings) -> Self {
        Self {
            reconciler,
            settings,
        }
    }

    /// Run the node control loop until `token` is cancelled.
    pub async fn watch_nodes(&self, token: CancellationToken) -> Result<(), ControllerError> {
        watch_resource::<Node, _, _>(
            Arc::clone(&self.reconciler.nodes),
            Arc::clone(&self.reconciler),
            |reconciler: Arc<Reconciler>, node: Arc<Node>| {
                Box::pin(async move { reconciler.reconcile_node(&node).await }) as ReconcileFuture
            },
            self.settings.clone(),
            token,
        )
        .await
    }

    /// Run the pod control loop until `token` is cancelled.
    pub async fn watch_pods(&self, token: CancellationToken) -> Result<(), ControllerError> {
        watch_resource::<Pod, _, _>(
            Arc::clone(&self.reconciler.pods),
            Arc::clone(&self.reconciler),
            |reconciler: Arc<Reconciler>, pod: Arc<Pod>| {
                Box::pin(async move { reconciler.reconcile_pod(&pod).await }) as ReconcileFuture
            },
            self.settings.clone(),
            token,
        )
        .await
    }
}
