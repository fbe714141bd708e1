//! Migration orchestrator
//!
//! [`Migrator`] owns the task store, the work queue, the worker pool and the
//! watch subscriptions. Callers interact with it through [`MigrationControl`].

use crate::config::MigratorConfig;
use crate::error::MigrationError;
use crate::oneshot;
use crate::platform::{PlatformClient, WorkloadObject};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::store::{Generations, MigrationTask, TaskStore};
use crate::types::{
    CreateOptions, MigrationOptions, MigrationPair, MigrationResult, ResourceRef, Strategy,
    TaskId,
};
use crate::watch::Subscriptions;
use crate::worker::WorkerPool;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Name of the reconcile queue
pub const QUEUE_NAME: &str = "cloneset-migration";

/// Control surface for submitting and observing migrations
#[async_trait]
pub trait MigrationControl: Send + Sync {
    /// Start a migration from `src` to `dst`
    ///
    /// Returns the initial snapshot. Bounded-surge migrations come back
    /// `Executing`; one-shot migrations come back already terminal.
    async fn submit(
        &self,
        src: ResourceRef,
        dst: ResourceRef,
        opts: MigrationOptions,
    ) -> Result<MigrationResult, MigrationError>;

    /// Snapshot a task's progress
    fn query(&self, id: TaskId) -> Result<MigrationResult, MigrationError>;
}

/// The orchestrator
pub struct Migrator {
    config: MigratorConfig,
    platform: Arc<dyn PlatformClient>,
    store: Arc<TaskStore>,
    queue: WorkQueue<TaskId>,
    subscriptions: Subscriptions,
    workers: Mutex<Option<WorkerPool>>,
    stop: watch::Sender<bool>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("tasks", &self.store.len())
            .field("queue", &self.queue)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    /// Start the orchestrator and its worker pool
    ///
    /// Must be called from within a tokio runtime. Watch subscriptions are
    /// started lazily as kinds are first submitted.
    #[must_use]
    pub fn start(platform: Arc<dyn PlatformClient>, config: MigratorConfig) -> Self {
        let store = Arc::new(TaskStore::new());
        let queue = WorkQueue::new(QUEUE_NAME, config.rate_limiter);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            config.max_write_retries,
        ));
        let workers = WorkerPool::spawn(config.workers, queue.clone(), reconciler);
        let (stop, stop_rx) = watch::channel(false);
        let subscriptions = Subscriptions::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            queue.clone(),
            stop_rx,
        );

        tracing::info!(workers = config.workers, "migrator started");

        Self {
            config,
            platform,
            store,
            queue,
            subscriptions,
            workers: Mutex::new(Some(workers)),
            stop,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Number of stored tasks, finished or not
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.store.len()
    }

    /// Create a CloneSet from a Deployment without migrating replicas
    ///
    /// # Errors
    /// - `MigrationError::ShuttingDown` after [`Migrator::shutdown`]
    /// - `MigrationError::UnsupportedPair` unless the refs name a Deployment and a CloneSet
    /// - `MigrationError::DestinationExists` if the CloneSet is already present
    /// - `MigrationError::Platform` if reading or creating fails
    pub async fn create(
        &self,
        src: &ResourceRef,
        dst: &ResourceRef,
        opts: CreateOptions,
    ) -> Result<WorkloadObject, MigrationError> {
        if self.queue.is_shutting_down() {
            return Err(MigrationError::ShuttingDown);
        }
        oneshot::create_destination(self.platform.as_ref(), src, dst, opts).await
    }

    /// Stop workers and subscriptions and wait for them to exit
    ///
    /// Executing tasks stay `Executing`; later submissions fail with
    /// `MigrationError::ShuttingDown`.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        self.queue.shutdown();

        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            workers.join().await;
        }
        self.subscriptions.join().await;
        tracing::info!("migrator stopped");
    }

    async fn submit_bounded_surge(
        &self,
        src: ResourceRef,
        dst: ResourceRef,
        pair: MigrationPair,
        opts: &MigrationOptions,
    ) -> Result<MigrationResult, MigrationError> {
        let source = self.platform.get(&src).await?;
        let destination = self.platform.get(&dst).await?;
        let options = opts.resolve(source.declared_replicas())?;
        let baseline = Generations {
            src: source.metadata.generation,
            dst: destination.metadata.generation,
        };
        let task = Arc::new(MigrationTask::new(src, dst, pair, options, baseline));

        {
            let mut writer = self.store.write();
            writer.ensure_available(&task.src)?;
            writer.ensure_available(&task.dst)?;

            let (src_kind, dst_kind) = pair.kinds();
            for kind in [src_kind, dst_kind] {
                if !writer.is_watched(kind) {
                    self.subscriptions.start(kind)?;
                    writer.mark_watched(kind);
                }
            }
            writer.insert(Arc::clone(&task));
        }
        self.queue.add(task.id);

        tracing::info!(
            task = %task.id,
            src = %task.src,
            dst = %task.dst,
            replicas = options.replicas,
            max_surge = options.max_surge,
            timeout_secs = options.timeout.map(|t| t.as_secs()),
            "migration submitted"
        );
        Ok(task.snapshot())
    }
}

#[async_trait]
impl MigrationControl for Migrator {
    async fn submit(
        &self,
        src: ResourceRef,
        dst: ResourceRef,
        opts: MigrationOptions,
    ) -> Result<MigrationResult, MigrationError> {
        if self.queue.is_shutting_down() {
            return Err(MigrationError::ShuttingDown);
        }

        let evicted = self.store.prune(&self.config.retention, Instant::now());
        if evicted > 0 {
            tracing::debug!(evicted, "pruned finished tasks");
        }

        opts.validate()?;
        let pair = MigrationPair::resolve(&src, &dst)?;

        match pair.strategy() {
            Strategy::BoundedSurge => self.submit_bounded_surge(src, dst, pair, &opts).await,
            Strategy::OneShot => {
                oneshot::migrate(
                    self.platform.as_ref(),
                    &self.store,
                    pair,
                    src,
                    dst,
                    opts.copy_replicas,
                )
                .await
            }
        }
    }

    fn query(&self, id: TaskId) -> Result<MigrationResult, MigrationError> {
        self.store.query(id)
    }
}

impl Drop for Migrator {
    fn drop(&mut self) {
        self.stop.send_replace(true);
        self.queue.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionPolicy;
    use crate::platform::InMemoryPlatform;
    use crate::types::{MigrationState, WorkloadKind};

    fn platform_with(src_replicas: Option<i32>) -> Arc<InMemoryPlatform> {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut deployment = WorkloadObject::new(WorkloadKind::Deployment, "default", "web");
        deployment.spec.replicas = src_replicas;
        platform.insert(deployment);
        platform.insert(WorkloadObject::new(WorkloadKind::CloneSet, "default", "web-cs"));
        platform
    }

    fn refs() -> (ResourceRef, ResourceRef) {
        (
            ResourceRef::deployment("default", "web"),
            ResourceRef::cloneset("default", "web-cs"),
        )
    }

    // Objects are never settled here, so tasks stay executing
    fn migrator(platform: Arc<InMemoryPlatform>) -> Migrator {
        Migrator::start(platform, MigratorConfig::new().with_workers(1))
    }

    #[tokio::test]
    async fn zero_replicas_is_rejected() {
        let m = migrator(platform_with(Some(10)));
        let (src, dst) = refs();

        let err = m
            .submit(src, dst, MigrationOptions::new().with_replicas(0))
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("invalid replicas 0"));
        assert_eq!(m.task_count(), 0);
    }

    #[tokio::test]
    async fn replicas_default_to_source_count() {
        let m = migrator(platform_with(Some(7)));
        let (src, dst) = refs();

        let result = m.submit(src, dst, MigrationOptions::new()).await.unwrap();

        assert_eq!(result.state, MigrationState::Executing);
        assert_eq!(result.src_migrated_replicas, 0);
        assert_eq!(result.dst_migrated_replicas, 0);
        assert_eq!(m.store.get(result.id).unwrap().options.replicas, 7);
        assert_eq!(m.store.get(result.id).unwrap().options.max_surge, 1);
        assert_eq!(m.config().workers, 1);
    }

    #[tokio::test]
    async fn source_without_replicas_is_rejected() {
        let m = migrator(platform_with(None));
        let (src, dst) = refs();

        let err = m.submit(src, dst, MigrationOptions::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidOptions(_)));
        assert_eq!(m.task_count(), 0);
    }

    #[tokio::test]
    async fn owned_destination_is_rejected() {
        let platform = platform_with(Some(4));
        let mut other = WorkloadObject::new(WorkloadKind::Deployment, "default", "api");
        other.spec.replicas = Some(2);
        platform.insert(other);
        let m = migrator(platform);
        let (src, dst) = refs();

        m.submit(src, dst.clone(), MigrationOptions::new()).await.unwrap();
        let err = m
            .submit(
                ResourceRef::deployment("default", "api"),
                dst,
                MigrationOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("already existing migration task"));
        assert_eq!(m.task_count(), 1);
    }

    #[tokio::test]
    async fn owned_source_is_rejected() {
        let platform = platform_with(Some(4));
        platform.insert(WorkloadObject::new(WorkloadKind::CloneSet, "default", "api-cs"));
        let m = migrator(platform);
        let (src, dst) = refs();

        m.submit(src.clone(), dst, MigrationOptions::new()).await.unwrap();
        let err = m
            .submit(
                src.clone(),
                ResourceRef::cloneset("default", "api-cs"),
                MigrationOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(&err, MigrationError::AlreadyExecuting(r) if *r == src));
        assert!(err.to_string().contains("already existing migration task"));
        assert_eq!(m.task_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submits_admit_one_task_per_resource() {
        for _ in 0..16 {
            let platform = platform_with(Some(4));
            platform.insert(WorkloadObject::new(WorkloadKind::CloneSet, "default", "api-cs"));
            let m = Arc::new(migrator(platform));
            let (src, _) = refs();

            let submits: Vec<_> = ["web-cs", "api-cs"]
                .into_iter()
                .map(|dst| {
                    let m = Arc::clone(&m);
                    let src = src.clone();
                    let dst = ResourceRef::cloneset("default", dst);
                    tokio::spawn(async move { m.submit(src, dst, MigrationOptions::new()).await })
                })
                .collect();

            let mut admitted = 0;
            for handle in submits {
                match handle.await.unwrap() {
                    Ok(_) => admitted += 1,
                    Err(e) => {
                        assert!(e.to_string().contains("already existing migration task"));
                    }
                }
            }
            assert_eq!(admitted, 1);
            assert_eq!(m.task_count(), 1);
        }
    }

    #[tokio::test]
    async fn unsupported_pair_is_rejected() {
        let m = migrator(platform_with(Some(1)));
        let err = m
            .submit(
                ResourceRef::deployment("default", "web"),
                ResourceRef::advanced_statefulset("default", "web"),
                MigrationOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedPair { .. }));
    }

    #[tokio::test]
    async fn watches_start_once_per_kind() {
        let platform = platform_with(Some(1));
        let mut other = WorkloadObject::new(WorkloadKind::Deployment, "default", "api");
        other.spec.replicas = Some(1);
        platform.insert(other);
        platform.insert(WorkloadObject::new(WorkloadKind::CloneSet, "default", "api-cs"));
        let m = migrator(platform);
        let (src, dst) = refs();

        m.submit(src, dst, MigrationOptions::new()).await.unwrap();
        m.submit(
            ResourceRef::deployment("default", "api"),
            ResourceRef::cloneset("default", "api-cs"),
            MigrationOptions::new(),
        )
        .await
        .unwrap();

        assert_eq!(m.subscriptions.len(), 2);
    }

    #[tokio::test]
    async fn query_unknown_and_repeat() {
        let m = migrator(platform_with(Some(3)));
        assert!(matches!(
            m.query(TaskId::new()),
            Err(MigrationError::TaskNotFound(_))
        ));

        let (src, dst) = refs();
        let result = m.submit(src, dst, MigrationOptions::new()).await.unwrap();
        // Nothing settles, so no reconcile can make progress between queries
        assert_eq!(m.query(result.id).unwrap(), m.query(result.id).unwrap());
    }

    #[tokio::test]
    async fn submit_prunes_finished_tasks() {
        let platform = Arc::new(InMemoryPlatform::new());
        for name in ["a", "b"] {
            platform.insert(WorkloadObject::new(WorkloadKind::DaemonSet, "kube-system", name));
        }
        let config = MigratorConfig::new().with_retention(RetentionPolicy {
            finished_ttl_secs: 3600,
            max_finished: 1,
        });
        let m = Migrator::start(platform, config);

        let first = m
            .submit(
                ResourceRef::daemonset("kube-system", "a"),
                ResourceRef::advanced_daemonset("kube-system", "a"),
                MigrationOptions::new(),
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        m.submit(
            ResourceRef::daemonset("kube-system", "b"),
            ResourceRef::advanced_daemonset("kube-system", "b"),
            MigrationOptions::new(),
        )
        .await
        .unwrap();
        assert_eq!(m.task_count(), 2);

        let _ = m
            .submit(
                ResourceRef::daemonset("kube-system", "missing"),
                ResourceRef::advanced_daemonset("kube-system", "missing"),
                MigrationOptions::new(),
            )
            .await;
        assert_eq!(m.task_count(), 1);
        assert!(matches!(
            m.query(first.id),
            Err(MigrationError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let m = migrator(platform_with(Some(2)));
        let (src, dst) = refs();
        m.submit(src.clone(), dst.clone(), MigrationOptions::new())
            .await
            .unwrap();

        m.shutdown().await;

        let err = m.submit(src, dst, MigrationOptions::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::ShuttingDown));
        assert!(matches!(
            m.create(
                &ResourceRef::deployment("default", "web"),
                &ResourceRef::cloneset("default", "other"),
                CreateOptions::default()
            )
            .await,
            Err(MigrationError::ShuttingDown)
        ));
    }
}
