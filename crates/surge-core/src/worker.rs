//! Worker pool
//!
//! A fixed number of tokio tasks draining the work queue. The queue never
//! hands the same id to two workers at once, so reconciles of one task are
//! serialized while distinct tasks proceed in parallel.

use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::types::TaskId;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Running workers
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers (at least one)
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(workers: usize, queue: WorkQueue<TaskId>, reconciler: Arc<Reconciler>) -> Self {
        let workers = workers.max(1);
        let handles = (0..workers)
            .map(|index| tokio::spawn(run_worker(index, queue.clone(), Arc::clone(&reconciler))))
            .collect();
        tracing::debug!(workers, queue = queue.name(), "worker pool started");
        Self { handles }
    }

    /// Number of workers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    ///
    /// Workers exit once the queue is shut down.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker panicked");
            }
        }
    }
}

async fn run_worker(index: usize, queue: WorkQueue<TaskId>, reconciler: Arc<Reconciler>) {
    while let Some(id) = queue.get().await {
        match reconciler.reconcile(id).await {
            Ok(()) => queue.forget(&id),
            Err(e) => {
                tracing::warn!(
                    worker = index,
                    task = %id,
                    requeues = queue.num_requeues(&id),
                    error = %e,
                    "reconcile failed, requeueing with backoff"
                );
                queue.add_rate_limited(id);
            }
        }
        queue.done(&id);
    }
    tracing::debug!(worker = index, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;
    use crate::error::PlatformError;
    use crate::platform::{InMemoryPlatform, PlatformClient, WorkloadObject};
    use crate::store::{Generations, MigrationTask, TaskStore};
    use crate::types::{MigrationPair, MigrationState, ResolvedOptions, WorkloadKind};
    use std::time::Duration;

    #[tokio::test]
    async fn workers_retry_conflicts_and_exit_on_shutdown() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut src = WorkloadObject::new(WorkloadKind::Deployment, "default", "web");
        src.spec.replicas = Some(1);
        let src = platform.insert(src);
        let dst = platform.insert(WorkloadObject::new(WorkloadKind::CloneSet, "default", "web-cs"));
        platform.settle_all();

        let store = Arc::new(TaskStore::new());
        let task = Arc::new(MigrationTask::new(
            src.resource_ref(),
            dst.resource_ref(),
            MigrationPair::DeploymentToCloneSet,
            ResolvedOptions {
                replicas: 1,
                max_surge: 1,
                timeout: None,
            },
            Generations { src: 1, dst: 1 },
        ));
        store.write().insert(Arc::clone(&task));

        let queue = WorkQueue::new("worker-test", RateLimiterConfig::default());
        let client: Arc<dyn PlatformClient> = platform.clone();
        let reconciler = Arc::new(Reconciler::new(client, Arc::clone(&store), 5));
        let pool = WorkerPool::spawn(2, queue.clone(), reconciler);
        assert_eq!(pool.len(), 2);

        platform.fail_next_updates(PlatformError::Unavailable("flaky".into()), 2);
        queue.add(task.id);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if platform
                    .snapshot(&dst.resource_ref())
                    .is_some_and(|o| o.declared_replicas() == 1)
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(task.state(), MigrationState::Executing);

        queue.shutdown();
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .unwrap();
    }
}
