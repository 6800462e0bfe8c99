//! Minimal dispatcher that drives the reconciler.
//!
//! Keys are queued per sandbox and deduplicated. A key is never handed to
//! two passes at once: if it is re-queued while a pass runs, it is parked
//! and queued again when that pass finishes. Failed passes come back after
//! an exponential backoff; every sandbox is re-queued on each resync tick.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::reconcile::{PassOutcome, ReconcileError, Reconciler, VolumeProvisioner};
use crate::resources::Kind;
use crate::resources::labels::Labels;
use crate::store::{OwnerLinker, ResourceStore, StoreError};

/// Passes allowed to run at the same time, across distinct sandboxes.
const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Exponential retry delay: `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Deduplicating FIFO of sandbox keys.
#[derive(Debug, Default)]
pub struct WorkQueue {
    order: VecDeque<ObjectKey>,
    queued: BTreeSet<ObjectKey>,
    active: BTreeSet<ObjectKey>,
    parked: BTreeSet<ObjectKey>,
}

impl WorkQueue {
    pub fn add(&mut self, key: ObjectKey) {
        if self.active.contains(&key) {
            self.parked.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.order.push_back(key);
        }
    }

    /// Next key to process; it stays active until [`WorkQueue::done`].
    pub fn pop(&mut self) -> Option<ObjectKey> {
        let key = self.order.pop_front()?;
        self.queued.remove(&key);
        self.active.insert(key.clone());
        Some(key)
    }

    pub fn done(&mut self, key: &ObjectKey) {
        self.active.remove(key);
        if self.parked.remove(key) {
            self.add(key.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Handle for queuing keys into a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl ControllerHandle {
    /// Returns false once the controller has stopped.
    pub fn enqueue(&self, key: ObjectKey) -> bool {
        self.tx.send(key).is_ok()
    }
}

pub struct Controller<S: ?Sized, V, O> {
    reconciler: Arc<Reconciler<S, V, O>>,
    namespace: String,
    resync: Duration,
    backoff: Backoff,
    workers: usize,
    tx: mpsc::UnboundedSender<ObjectKey>,
    rx: mpsc::UnboundedReceiver<ObjectKey>,
}

impl<S, V, O> Controller<S, V, O>
where
    S: ResourceStore + ?Sized + 'static,
    V: VolumeProvisioner + 'static,
    O: OwnerLinker + 'static,
{
    pub fn new(reconciler: Reconciler<S, V, O>, config: &Config) -> Result<Self> {
        let (base, max) = config.retry_bounds()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            reconciler: Arc::new(reconciler),
            namespace: config.reconcile.namespace.clone(),
            resync: config.resync_interval()?,
            backoff: Backoff::new(base, max),
            workers: DEFAULT_WORKERS,
            tx,
            rx,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run until `shutdown` resolves. In-flight passes are dropped.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Controller {
            reconciler,
            namespace,
            resync,
            backoff,
            workers,
            tx,
            mut rx,
        } = self;
        info!(%namespace, ?resync, workers, "starting controller");

        let mut queue = WorkQueue::default();
        let mut attempts: HashMap<ObjectKey, u32> = HashMap::new();
        let mut running: HashMap<Id, ObjectKey> = HashMap::new();
        let mut inflight: JoinSet<Result<PassOutcome, ReconcileError>> = JoinSet::new();
        let mut ticker = tokio::time::interval(resync);
        tokio::pin!(shutdown);

        loop {
            while inflight.len() < workers {
                let Some(key) = queue.pop() else { break };
                let reconciler = Arc::clone(&reconciler);
                let pass_key = key.clone();
                let handle = inflight.spawn(async move {
                    reconciler
                        .reconcile(&pass_key.namespace, &pass_key.name)
                        .await
                });
                running.insert(handle.id(), key);
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!(in_flight = inflight.len(), "shutting down controller");
                    inflight.abort_all();
                    break;
                }
                _ = ticker.tick() => {
                    match list_keys(reconciler.store().as_ref(), &namespace).await {
                        Ok(keys) => {
                            debug!(count = keys.len(), "resync");
                            keys.into_iter().for_each(|k| queue.add(k));
                        }
                        Err(e) => warn!("resync failed to list sandboxes: {e}"),
                    }
                }
                Some(key) = rx.recv() => queue.add(key),
                Some(joined) = inflight.join_next_with_id() => {
                    let (id, result) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            error!("reconcile task failed: {e}");
                            if let Some(key) = running.remove(&e.id()) {
                                queue.done(&key);
                            }
                            continue;
                        }
                    };
                    let Some(key) = running.remove(&id) else { continue };
                    queue.done(&key);

                    match result {
                        Ok(_) => {
                            attempts.remove(&key);
                        }
                        Err(e) => {
                            let attempt = attempts.entry(key.clone()).or_insert(0);
                            *attempt += 1;
                            let delay = backoff.delay(*attempt);
                            warn!(
                                sandbox = %key,
                                attempt = *attempt,
                                retry_in = ?delay,
                                phase = %e.phase(),
                                "reconcile failed: {e}"
                            );
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                sleep(delay).await;
                                let _ = tx.send(key);
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn list_keys<S>(store: &S, namespace: &str) -> Result<Vec<ObjectKey>, StoreError>
where
    S: ResourceStore + ?Sized,
{
    let sandboxes = store.list(Kind::Sandbox, namespace, &Labels::new()).await?;
    Ok(sandboxes
        .iter()
        .map(|o| ObjectKey::new(&o.metadata().namespace, &o.metadata().name))
        .collect())
}
