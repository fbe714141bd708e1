//! Bounded-surge reconciler
//!
//! Invoked once per dequeued task id. Each pass re-reads both objects from the
//! platform, checks they are fresh, plans one step with
//! [`plan_step`](crate::surge::plan_step) and performs at most one write.

use crate::error::{PlatformError, ReconcileError};
use crate::platform::{PlatformClient, WorkloadObject};
use crate::store::{MigrationTask, TaskStore};
use crate::surge::{plan_step, Counters, Observed, Step, WaitReason};
use crate::types::{MigrationState, ResourceRef, TaskId};
use std::sync::Arc;

/// Which side of the migration a write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Src,
    Dst,
}

/// Applies bounded-surge steps to executing tasks
pub struct Reconciler {
    platform: Arc<dyn PlatformClient>,
    store: Arc<TaskStore>,
    max_write_retries: u32,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("max_write_retries", &self.max_write_retries)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler
    #[must_use]
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        store: Arc<TaskStore>,
        max_write_retries: u32,
    ) -> Self {
        Self {
            platform,
            store,
            max_write_retries,
        }
    }

    /// Run one pass over a task
    ///
    /// # Errors
    /// Returns `ReconcileError` for transient write failures that the queue
    /// should retry with backoff. Every other outcome is recorded on the task.
    pub async fn reconcile(&self, id: TaskId) -> Result<(), ReconcileError> {
        let Some(task) = self.store.get(id) else {
            tracing::debug!(task = %id, "task no longer stored, skipping");
            return Ok(());
        };

        if task.state().is_terminal() {
            return Ok(());
        }
        if task.is_complete() {
            self.finish(&task, MigrationState::Succeeded, String::new());
            return Ok(());
        }
        if task.timed_out() {
            let secs = task.options.timeout.map_or(0, |t| t.as_secs());
            self.finish(
                &task,
                MigrationState::Failed,
                format!("migration task timeout exceeded after {secs}s"),
            );
            return Ok(());
        }

        let (src, dst) = match self.read_pair(&task).await {
            Ok(pair) => pair,
            Err(e) => {
                self.finish(&task, MigrationState::Failed, e.to_string());
                return Ok(());
            }
        };

        let recorded = task.generations();
        if src.metadata.generation < recorded.src || dst.metadata.generation < recorded.dst {
            tracing::debug!(task = %id, "read is older than our last write, waiting");
            return Ok(());
        }
        if !src.is_observed() || !dst.is_observed() {
            tracing::debug!(task = %id, "workload controllers have not caught up, waiting");
            return Ok(());
        }

        let result = task.snapshot();
        let counters = Counters {
            src_migrated: result.src_migrated_replicas,
            dst_migrated: result.dst_migrated_replicas,
        };
        let observed = Observed {
            src_declared: src.declared_replicas(),
            dst_declared: dst.declared_replicas(),
            dst_available: dst.status.available_replicas,
        };

        match plan_step(task.options.replicas, task.options.max_surge, counters, observed) {
            Step::Complete => {
                self.finish(&task, MigrationState::Succeeded, String::new());
            }
            Step::ScaleOut(n) => {
                let Some(replicas) = observed.dst_declared.checked_add(n) else {
                    let message = overflow(&task.dst, "scale out", n);
                    self.finish(&task, MigrationState::Failed, message);
                    return Ok(());
                };
                let mut dst = dst;
                dst.spec.replicas = Some(replicas);
                if self.write(&task, Side::Dst, dst).await? {
                    task.advance(0, n);
                    tracing::info!(task = %id, dst = %task.dst, scale_out = n, "scaled out destination");
                }
            }
            Step::ScaleIn(n) => {
                let Some(replicas) = observed.src_declared.checked_sub(n) else {
                    let message = overflow(&task.src, "scale in", n);
                    self.finish(&task, MigrationState::Failed, message);
                    return Ok(());
                };
                let mut src = src;
                src.spec.replicas = Some(replicas);
                if self.write(&task, Side::Src, src).await? {
                    task.advance(n, 0);
                    tracing::info!(task = %id, src = %task.src, scale_in = n, "scaled in source");
                }
            }
            Step::Wait(WaitReason::DestinationUnavailable) => {
                tracing::debug!(
                    task = %id,
                    declared = observed.dst_declared,
                    available = observed.dst_available,
                    "waiting for destination replicas to become available"
                );
            }
            Step::Wait(WaitReason::Idle) => {
                tracing::debug!(task = %id, "nothing to do this pass");
            }
        }
        Ok(())
    }

    async fn read_pair(
        &self,
        task: &MigrationTask,
    ) -> Result<(WorkloadObject, WorkloadObject), PlatformError> {
        let src = self.platform.get(&task.src).await?;
        let dst = self.platform.get(&task.dst).await?;
        Ok((src, dst))
    }

    /// Write one side; returns whether the write landed
    ///
    /// Retryable errors go back to the queue until `max_write_retries`
    /// consecutive failures, then the task fails.
    async fn write(
        &self,
        task: &MigrationTask,
        side: Side,
        object: WorkloadObject,
    ) -> Result<bool, ReconcileError> {
        let resource = object.resource_ref();
        match self.platform.update(object).await {
            Ok(written) => {
                task.reset_write_failures();
                match side {
                    Side::Src => task.record_src_generation(written.metadata.generation),
                    Side::Dst => task.record_dst_generation(written.metadata.generation),
                }
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                let attempt = task.record_write_failure();
                if attempt > self.max_write_retries {
                    self.finish(
                        task,
                        MigrationState::Failed,
                        format!("giving up after {attempt} failed writes: {e}"),
                    );
                    return Ok(false);
                }
                Err(ReconcileError::Write {
                    resource,
                    attempt,
                    source: e,
                })
            }
            Err(e) => {
                self.finish(task, MigrationState::Failed, e.to_string());
                Ok(false)
            }
        }
    }

    fn finish(&self, task: &MigrationTask, state: MigrationState, message: String) {
        if !self.store.finish(task, state, message.as_str()) {
            return;
        }
        let result = task.snapshot();
        match state {
            MigrationState::Failed => tracing::warn!(
                task = %task.id,
                src = %task.src,
                dst = %task.dst,
                message = %message,
                "migration failed"
            ),
            _ => tracing::info!(
                task = %task.id,
                src = %task.src,
                dst = %task.dst,
                created_at = %task.created_at,
                migrated = result.dst_migrated_replicas,
                elapsed_ms = u64::try_from(task.elapsed().as_millis()).unwrap_or(u64::MAX),
                "migration finished"
            ),
        }
    }
}

fn overflow(resource: &ResourceRef, step: &str, n: i32) -> String {
    format!("cannot {step} {resource} by {n}: replica count out of range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{InMemoryPlatform, WorkloadStatus};
    use crate::store::Generations;
    use crate::types::{MigrationPair, ResolvedOptions, ResourceRef, WorkloadKind};
    use std::time::{Duration, Instant};

    struct Fixture {
        platform: Arc<InMemoryPlatform>,
        store: Arc<TaskStore>,
        reconciler: Reconciler,
        src: ResourceRef,
        dst: ResourceRef,
    }

    impl Fixture {
        fn new(src_replicas: i32, dst_replicas: i32) -> Self {
            Self::with_retries(src_replicas, dst_replicas, 5)
        }

        fn with_retries(src_replicas: i32, dst_replicas: i32, retries: u32) -> Self {
            let platform = Arc::new(InMemoryPlatform::new());
            let mut deployment = WorkloadObject::new(WorkloadKind::Deployment, "default", "web");
            deployment.spec.replicas = Some(src_replicas);
            let mut cloneset = WorkloadObject::new(WorkloadKind::CloneSet, "default", "web-cs");
            cloneset.spec.replicas = Some(dst_replicas);
            let src = platform.insert(deployment).resource_ref();
            let dst = platform.insert(cloneset).resource_ref();
            platform.settle_all();

            let store = Arc::new(TaskStore::new());
            let client: Arc<dyn PlatformClient> = platform.clone();
            let reconciler = Reconciler::new(client, Arc::clone(&store), retries);
            Self {
                platform,
                store,
                reconciler,
                src,
                dst,
            }
        }

        fn baseline(&self) -> Generations {
            Generations {
                src: self.platform.snapshot(&self.src).unwrap().metadata.generation,
                dst: self.platform.snapshot(&self.dst).unwrap().metadata.generation,
            }
        }

        fn submit(&self, replicas: i32, max_surge: i32) -> Arc<MigrationTask> {
            self.submit_task(self.task(replicas, max_surge, None, self.baseline()))
        }

        fn task(
            &self,
            replicas: i32,
            max_surge: i32,
            timeout: Option<Duration>,
            baseline: Generations,
        ) -> MigrationTask {
            MigrationTask::new(
                self.src.clone(),
                self.dst.clone(),
                MigrationPair::DeploymentToCloneSet,
                ResolvedOptions {
                    replicas,
                    max_surge,
                    timeout,
                },
                baseline,
            )
        }

        fn submit_task(&self, task: MigrationTask) -> Arc<MigrationTask> {
            let task = Arc::new(task);
            self.store.write().insert(Arc::clone(&task));
            task
        }

        fn replicas(&self, resource: &ResourceRef) -> i32 {
            self.platform.snapshot(resource).unwrap().declared_replicas()
        }
    }

    #[tokio::test]
    async fn migrates_in_surge_sized_steps() {
        let f = Fixture::new(10, 0);
        let task = f.submit(10, 2);

        let mut previous = task.snapshot();
        for _ in 0..64 {
            f.reconciler.reconcile(task.id).await.unwrap();
            let current = task.snapshot();

            assert!(current.dst_migrated_replicas - current.src_migrated_replicas <= 2);
            assert!(current.src_migrated_replicas >= previous.src_migrated_replicas);
            assert!(current.dst_migrated_replicas >= previous.dst_migrated_replicas);
            assert!(current.dst_migrated_replicas <= 10);
            assert!(current.dst_migrated_replicas - previous.dst_migrated_replicas <= 2);
            assert!(current.src_migrated_replicas - previous.src_migrated_replicas <= 2);

            if current.state.is_terminal() {
                break;
            }
            f.platform.settle_all();
            previous = current;
        }

        let result = task.snapshot();
        assert_eq!(result.state, MigrationState::Succeeded);
        assert_eq!(result.src_migrated_replicas, 10);
        assert_eq!(result.dst_migrated_replicas, 10);
        assert_eq!(f.replicas(&f.src), 0);
        assert_eq!(f.replicas(&f.dst), 10);
        assert_eq!(f.store.executing_len(), 0);
    }

    #[tokio::test]
    async fn first_pass_scales_out_only() {
        let f = Fixture::new(10, 0);
        let task = f.submit(10, 2);

        f.reconciler.reconcile(task.id).await.unwrap();

        assert_eq!(f.replicas(&f.dst), 2);
        assert_eq!(f.replicas(&f.src), 10);
        assert_eq!(task.generations().dst, 2);
        assert_eq!(task.snapshot().dst_migrated_replicas, 2);
    }

    #[tokio::test]
    async fn waits_for_controller_to_observe() {
        let f = Fixture::new(10, 0);
        let task = f.submit(10, 2);

        f.reconciler.reconcile(task.id).await.unwrap();
        // Destination generation 2 is not observed yet
        f.reconciler.reconcile(task.id).await.unwrap();

        assert_eq!(f.replicas(&f.src), 10);
        assert_eq!(task.snapshot().src_migrated_replicas, 0);
    }

    #[tokio::test]
    async fn stale_generation_is_a_no_op() {
        let f = Fixture::new(10, 0);
        let mut baseline = f.baseline();
        baseline.dst += 1;
        let task = f.submit_task(f.task(10, 2, None, baseline));
        let before = task.snapshot();

        f.reconciler.reconcile(task.id).await.unwrap();

        assert_eq!(task.snapshot(), before);
        assert_eq!(f.replicas(&f.dst), 0);
    }

    #[tokio::test]
    async fn scale_in_waits_for_full_availability() {
        let f = Fixture::new(10, 0);
        let task = f.submit(10, 2);

        f.reconciler.reconcile(task.id).await.unwrap();
        f.platform
            .set_status(
                &f.dst,
                WorkloadStatus {
                    observed_generation: 2,
                    replicas: 2,
                    available_replicas: 1,
                },
            )
            .unwrap();

        f.reconciler.reconcile(task.id).await.unwrap();
        assert_eq!(f.replicas(&f.src), 10);

        f.platform.settle_all();
        f.reconciler.reconcile(task.id).await.unwrap();
        assert_eq!(f.replicas(&f.src), 8);
        assert_eq!(task.snapshot().src_migrated_replicas, 2);
    }

    #[tokio::test]
    async fn timeout_fails_task_and_sticks() {
        let f = Fixture::new(10, 0);
        let started = Instant::now().checked_sub(Duration::from_secs(2)).unwrap();
        let task = f.submit_task(
            f.task(10, 2, Some(Duration::from_secs(1)), f.baseline())
                .started_at(started),
        );

        f.reconciler.reconcile(task.id).await.unwrap();

        let first = f.store.query(task.id).unwrap();
        assert_eq!(first.state, MigrationState::Failed);
        assert!(first.message.contains("timeout"));
        assert_eq!(f.replicas(&f.dst), 0);

        f.reconciler.reconcile(task.id).await.unwrap();
        assert_eq!(f.store.query(task.id).unwrap(), first);
    }

    #[tokio::test]
    async fn missing_object_fails_task() {
        let f = Fixture::new(4, 0);
        let task = f.submit(4, 1);
        f.platform
            .delete(&f.dst, crate::platform::DeletionPropagation::Background)
            .await
            .unwrap();

        f.reconciler.reconcile(task.id).await.unwrap();

        let result = task.snapshot();
        assert_eq!(result.state, MigrationState::Failed);
        assert!(result.message.contains("not found"));
        assert_eq!(f.store.owner_of(&f.src), None);
    }

    #[tokio::test]
    async fn conflicts_are_retried_then_succeed() {
        let f = Fixture::new(4, 0);
        let task = f.submit(4, 1);
        let conflict = PlatformError::Conflict {
            resource: f.dst.clone(),
            expected: 1,
            actual: 2,
        };
        f.platform.fail_next_updates(conflict, 2);

        assert!(f.reconciler.reconcile(task.id).await.is_err());
        assert!(f.reconciler.reconcile(task.id).await.is_err());
        f.reconciler.reconcile(task.id).await.unwrap();

        assert_eq!(task.state(), MigrationState::Executing);
        assert_eq!(task.snapshot().dst_migrated_replicas, 1);
        assert_eq!(f.replicas(&f.dst), 1);
    }

    #[tokio::test]
    async fn conflicts_beyond_budget_fail_task() {
        let f = Fixture::with_retries(4, 0, 1);
        let task = f.submit(4, 1);
        f.platform
            .fail_next_updates(PlatformError::Unavailable("apiserver down".into()), 2);

        assert!(f.reconciler.reconcile(task.id).await.is_err());
        f.reconciler.reconcile(task.id).await.unwrap();

        let result = task.snapshot();
        assert_eq!(result.state, MigrationState::Failed);
        assert!(result.message.contains("apiserver down"));
    }

    #[tokio::test]
    async fn replica_overflow_fails_task() {
        let f = Fixture::new(10, i32::MAX - 1);
        let task = f.submit(10, 2);

        f.reconciler.reconcile(task.id).await.unwrap();

        let result = task.snapshot();
        assert_eq!(result.state, MigrationState::Failed);
        assert!(result.message.contains("out of range"));
        assert_eq!(result.dst_migrated_replicas, 0);
        assert_eq!(f.replicas(&f.dst), i32::MAX - 1);
        assert_eq!(f.store.owner_of(&f.dst), None);
    }

    #[tokio::test]
    async fn terminal_task_is_untouched() {
        let f = Fixture::new(4, 0);
        let task = f.submit(4, 1);
        f.store.finish(&task, MigrationState::Failed, "stopped");

        f.reconciler.reconcile(task.id).await.unwrap();

        assert_eq!(f.replicas(&f.dst), 0);
        assert_eq!(task.snapshot().message, "stopped");
    }

    #[tokio::test]
    async fn unknown_task_is_ignored() {
        let f = Fixture::new(1, 0);
        assert!(f.reconciler.reconcile(TaskId::new()).await.is_ok());
    }
}
