//! Task store
//!
//! Concurrent registry of migration tasks with an exclusivity index:
//! - One `RwLock` guards structure (id → task, resource → owning task, watched kinds)
//! - Each task guards its own result and reconcile cursor
//!
//! Lock order is always store → task; no code path takes the store lock while
//! holding a task lock.

use crate::config::RetentionPolicy;
use crate::error::MigrationError;
use crate::types::{
    MigrationPair, MigrationResult, MigrationState, ResolvedOptions, ResourceRef, TaskId,
    WorkloadKind,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Generations last written by a task, per side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generations {
    /// Source generation
    pub src: i64,
    /// Destination generation
    pub dst: i64,
}

#[derive(Debug)]
struct ReconcileCursor {
    generations: Generations,
    write_failures: u32,
}

#[derive(Debug)]
struct ResultCell {
    result: MigrationResult,
    finished_at: Option<Instant>,
}

/// A single migration task
#[derive(Debug)]
pub struct MigrationTask {
    /// Task ID
    pub id: TaskId,
    /// Source resource
    pub src: ResourceRef,
    /// Destination resource
    pub dst: ResourceRef,
    /// Kind pair being migrated
    pub pair: MigrationPair,
    /// Options after defaulting
    pub options: ResolvedOptions,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    started: Instant,
    cursor: Mutex<ReconcileCursor>,
    cell: Mutex<ResultCell>,
}

impl MigrationTask {
    /// Create an executing task with baseline generations
    #[must_use]
    pub fn new(
        src: ResourceRef,
        dst: ResourceRef,
        pair: MigrationPair,
        options: ResolvedOptions,
        baseline: Generations,
    ) -> Self {
        let id = TaskId::new();
        Self {
            id,
            src,
            dst,
            pair,
            options,
            created_at: Utc::now(),
            started: Instant::now(),
            cursor: Mutex::new(ReconcileCursor {
                generations: baseline,
                write_failures: 0,
            }),
            cell: Mutex::new(ResultCell {
                result: MigrationResult::executing(id),
                finished_at: None,
            }),
        }
    }

    /// Create a task that finished synchronously
    #[must_use]
    pub fn completed(
        src: ResourceRef,
        dst: ResourceRef,
        pair: MigrationPair,
        replicas: i32,
    ) -> Self {
        let options = ResolvedOptions {
            replicas,
            max_surge: 0,
            timeout: None,
        };
        let task = Self::new(src, dst, pair, options, Generations::default());
        {
            let mut cell = task.cell.lock();
            cell.result = MigrationResult::succeeded(task.id);
            cell.finished_at = Some(task.started);
        }
        task
    }

    #[cfg(test)]
    pub(crate) fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    /// Snapshot of the current result
    #[must_use]
    pub fn snapshot(&self) -> MigrationResult {
        self.cell.lock().result.clone()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> MigrationState {
        self.cell.lock().result.state
    }

    /// When the task reached a terminal state
    #[must_use]
    pub fn finished_at(&self) -> Option<Instant> {
        self.cell.lock().finished_at
    }

    /// Time since the task started
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the configured timeout has passed
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.options.timeout.is_some_and(|t| self.elapsed() > t)
    }

    /// Whether both counters reached the target
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let cell = self.cell.lock();
        cell.result.src_migrated_replicas == self.options.replicas
            && cell.result.dst_migrated_replicas == self.options.replicas
    }

    /// Generations last written by this task
    #[must_use]
    pub fn generations(&self) -> Generations {
        self.cursor.lock().generations
    }

    /// Record the source generation after a write
    pub fn record_src_generation(&self, generation: i64) {
        self.cursor.lock().generations.src = generation;
    }

    /// Record the destination generation after a write
    pub fn record_dst_generation(&self, generation: i64) {
        self.cursor.lock().generations.dst = generation;
    }

    /// Count a retryable write failure, returning the consecutive total
    pub fn record_write_failure(&self) -> u32 {
        let mut cursor = self.cursor.lock();
        cursor.write_failures += 1;
        cursor.write_failures
    }

    /// Clear the consecutive write failure count
    pub fn reset_write_failures(&self) {
        self.cursor.lock().write_failures = 0;
    }

    /// Advance migrated counters
    ///
    /// Counters never decrease and never pass the target.
    pub fn advance(&self, src_delta: i32, dst_delta: i32) {
        debug_assert!(src_delta >= 0 && dst_delta >= 0);
        let mut cell = self.cell.lock();
        let target = self.options.replicas;
        let result = &mut cell.result;
        result.src_migrated_replicas = (result.src_migrated_replicas + src_delta.max(0)).min(target);
        result.dst_migrated_replicas = (result.dst_migrated_replicas + dst_delta.max(0)).min(target);
    }

    /// Move to a terminal state
    ///
    /// Returns false if the task was already terminal; the first terminal
    /// state and message stick.
    pub fn finish(&self, state: MigrationState, message: impl Into<String>) -> bool {
        debug_assert!(state.is_terminal());
        let mut cell = self.cell.lock();
        if cell.result.state.is_terminal() {
            return false;
        }
        cell.result.state = state;
        cell.result.message = message.into();
        cell.finished_at = Some(Instant::now());
        true
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    tasks: HashMap<TaskId, Arc<MigrationTask>>,
    executing: HashMap<ResourceRef, TaskId>,
    watched: HashSet<WorkloadKind>,
}

/// Registry of tasks with an exclusivity index
#[derive(Debug, Default)]
pub struct TaskStore {
    inner: RwLock<StoreInner>,
}

impl TaskStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a task
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Arc<MigrationTask>> {
        self.inner.read().tasks.get(&id).cloned()
    }

    /// Snapshot a task's result
    ///
    /// # Errors
    /// - `MigrationError::TaskNotFound` if the id is unknown or evicted
    pub fn query(&self, id: TaskId) -> Result<MigrationResult, MigrationError> {
        let task = self.get(id).ok_or(MigrationError::TaskNotFound(id))?;
        Ok(task.snapshot())
    }

    /// Executing task that owns a resource
    #[must_use]
    pub fn owner_of(&self, resource: &ResourceRef) -> Option<TaskId> {
        self.inner.read().executing.get(resource).copied()
    }

    /// Executing tasks owning any resource of `kind`
    #[must_use]
    pub fn executing_with_kind(&self, kind: WorkloadKind) -> Vec<TaskId> {
        let inner = self.inner.read();
        let mut ids: Vec<TaskId> = inner
            .executing
            .iter()
            .filter(|(r, _)| r.workload_kind() == Some(kind))
            .map(|(_, id)| *id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Take the structural write lock
    pub fn write(&self) -> StoreWriter<'_> {
        StoreWriter {
            guard: self.inner.write(),
        }
    }

    /// Finish a task and release its resources
    ///
    /// Returns false if the task was already terminal.
    pub fn finish(&self, task: &MigrationTask, state: MigrationState, message: impl Into<String>) -> bool {
        if !task.finish(state, message) {
            return false;
        }
        let mut inner = self.inner.write();
        for resource in [&task.src, &task.dst] {
            if inner.executing.get(resource) == Some(&task.id) {
                inner.executing.remove(resource);
            }
        }
        true
    }

    /// Evict finished tasks per the retention policy
    ///
    /// Executing tasks are never evicted. Returns the number evicted.
    pub fn prune(&self, policy: &RetentionPolicy, now: Instant) -> usize {
        let mut inner = self.inner.write();
        let mut finished: Vec<(Instant, TaskId)> = inner
            .tasks
            .values()
            .filter_map(|t| t.finished_at().map(|at| (at, t.id)))
            .collect();
        finished.sort_unstable();

        let ttl = policy.finished_ttl();
        let expired = finished
            .iter()
            .take_while(|(at, _)| now.saturating_duration_since(*at) > ttl)
            .count();
        let over_cap = finished.len().saturating_sub(expired).saturating_sub(policy.max_finished);
        let evict = expired + over_cap;

        for (_, id) in &finished[..evict] {
            inner.tasks.remove(id);
        }
        evict
    }

    /// Number of stored tasks, finished or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().tasks.len()
    }

    /// Whether the store holds no tasks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().tasks.is_empty()
    }

    /// Number of resources owned by executing tasks
    #[must_use]
    pub fn executing_len(&self) -> usize {
        self.inner.read().executing.len()
    }
}

/// Structural write access held across a whole submission
pub struct StoreWriter<'a> {
    guard: RwLockWriteGuard<'a, StoreInner>,
}

impl StoreWriter<'_> {
    /// Fail if an executing task owns `resource`
    ///
    /// # Errors
    /// - `MigrationError::AlreadyExecuting` if the resource is owned
    pub fn ensure_available(&self, resource: &ResourceRef) -> Result<(), MigrationError> {
        if self.guard.executing.contains_key(resource) {
            return Err(MigrationError::AlreadyExecuting(resource.clone()));
        }
        Ok(())
    }

    /// Whether a watch for `kind` has been started
    #[must_use]
    pub fn is_watched(&self, kind: WorkloadKind) -> bool {
        self.guard.watched.contains(&kind)
    }

    /// Remember that a watch for `kind` is running
    pub fn mark_watched(&mut self, kind: WorkloadKind) {
        self.guard.watched.insert(kind);
    }

    /// Register a task; executing tasks also claim both resources
    pub fn insert(&mut self, task: Arc<MigrationTask>) {
        if !task.state().is_terminal() {
            self.guard.executing.insert(task.src.clone(), task.id);
            self.guard.executing.insert(task.dst.clone(), task.id);
        }
        self.guard.tasks.insert(task.id, task);
    }
}
