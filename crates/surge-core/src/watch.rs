//! Watch subscriptions
//!
//! One background task per workload kind turns platform events into queue
//! wake-ups for whichever executing task owns the changed object. Subscriptions
//! never touch task state.

use crate::error::PlatformError;
use crate::platform::{PlatformClient, WatchReceiver};
use crate::queue::WorkQueue;
use crate::store::TaskStore;
use crate::types::{TaskId, WorkloadKind};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Running per-kind subscriptions
pub struct Subscriptions {
    platform: Arc<dyn PlatformClient>,
    store: Arc<TaskStore>,
    queue: WorkQueue<TaskId>,
    stop: watch::Receiver<bool>,
    handles: Mutex<Vec<(WorkloadKind, JoinHandle<()>)>>,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<WorkloadKind> = self.handles.lock().iter().map(|(k, _)| *k).collect();
        f.debug_struct("Subscriptions")
            .field("kinds", &kinds)
            .finish_non_exhaustive()
    }
}

impl Subscriptions {
    /// Create an empty set of subscriptions
    ///
    /// Every subscription started later ends when `stop` turns true.
    #[must_use]
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        store: Arc<TaskStore>,
        queue: WorkQueue<TaskId>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            platform,
            store,
            queue,
            stop,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start watching `kind`
    ///
    /// Does not await; safe to call while holding the store write lock.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `PlatformError` if the platform refuses the watch
    pub fn start(&self, kind: WorkloadKind) -> Result<(), PlatformError> {
        let events = self.platform.watch(kind)?;
        let handle = tokio::spawn(run_subscription(
            kind,
            events,
            Arc::clone(&self.store),
            self.queue.clone(),
            self.stop.clone(),
        ));
        tracing::info!(%kind, "watch subscription started");
        self.handles.lock().push((kind, handle));
        Ok(())
    }

    /// Number of subscriptions started
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Whether no subscription has been started
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every subscription to end
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for (kind, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(%kind, error = %e, "watch subscription panicked");
            }
        }
    }
}

async fn run_subscription(
    kind: WorkloadKind,
    mut events: WatchReceiver,
    store: Arc<TaskStore>,
    queue: WorkQueue<TaskId>,
    mut stop: watch::Receiver<bool>,
) {
    if *stop.borrow() {
        return;
    }
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let resource = event.object.resource_ref();
                    if let Some(id) = store.owner_of(&resource) {
                        tracing::trace!(%kind, task = %id, event = ?event.event_type, "enqueue from watch");
                        queue.add(id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let ids = store.executing_with_kind(kind);
                    tracing::warn!(%kind, skipped, resync = ids.len(), "watch lagged, resyncing");
                    for id in ids {
                        queue.add(id);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!(%kind, "watch channel closed");
                    break;
                }
            }
        }
    }
    tracing::debug!(%kind, "watch subscription stopped");
}
