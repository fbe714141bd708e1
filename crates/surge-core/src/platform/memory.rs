//! In-memory platform
//!
//! A [`PlatformClient`] backed by a map, with generations, optimistic
//! concurrency and per-kind watch channels. [`ControllerSimulator`] plays the
//! role of the workload controllers: it reacts to spec changes by reporting the
//! new generation as observed and every declared replica as available.

use super::{
    DeletionPropagation, PlatformClient, WatchEvent, WatchEventType, WatchReceiver,
    WorkloadObject, WorkloadStatus,
};
use crate::error::PlatformError;
use crate::types::{ResourceRef, WorkloadKind};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Map-backed platform client
#[derive(Debug)]
pub struct InMemoryPlatform {
    objects: RwLock<HashMap<ResourceRef, WorkloadObject>>,
    channels: DashMap<WorkloadKind, broadcast::Sender<WatchEvent>>,
    channel_capacity: usize,
    next_version: AtomicU64,
    update_failures: Mutex<VecDeque<PlatformError>>,
    deletions: Mutex<Vec<(ResourceRef, DeletionPropagation)>>,
}

impl InMemoryPlatform {
    /// Create an empty platform
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty platform whose watch channels buffer `capacity` events
    #[must_use]
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            channels: DashMap::new(),
            channel_capacity: capacity.max(1),
            next_version: AtomicU64::new(1),
            update_failures: Mutex::new(VecDeque::new()),
            deletions: Mutex::new(Vec::new()),
        }
    }

    /// Seed an object, keeping its status as given
    ///
    /// Generation defaults to 1 when unset. Replaces any existing object.
    pub fn insert(&self, mut object: WorkloadObject) -> WorkloadObject {
        object.metadata.generation = object.metadata.generation.max(1);
        object.metadata.resource_version = self.bump_version();
        let mut objects = self.objects.write();
        let event_type = if objects.contains_key(&object.resource_ref()) {
            WatchEventType::Modified
        } else {
            WatchEventType::Added
        };
        objects.insert(object.resource_ref(), object.clone());
        self.emit(event_type, &object);
        object
    }

    /// Current object, without going through the async client
    #[must_use]
    pub fn snapshot(&self, resource: &ResourceRef) -> Option<WorkloadObject> {
        self.objects.read().get(resource).cloned()
    }

    /// Number of stored objects
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether no objects are stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Deletions performed so far, with their propagation policy
    #[must_use]
    pub fn deletions(&self) -> Vec<(ResourceRef, DeletionPropagation)> {
        self.deletions.lock().clone()
    }

    /// Make the next `count` updates fail with `error`
    pub fn fail_next_updates(&self, error: PlatformError, count: usize) {
        let mut failures = self.update_failures.lock();
        failures.extend(std::iter::repeat(error).take(count));
    }

    /// Report the object's latest generation as observed and all replicas available
    ///
    /// Returns whether the status changed.
    pub fn settle(&self, resource: &ResourceRef) -> bool {
        let mut objects = self.objects.write();
        let Some(object) = objects.get_mut(resource) else {
            return false;
        };
        let desired = WorkloadStatus {
            observed_generation: object.metadata.generation,
            replicas: object.declared_replicas(),
            available_replicas: object.declared_replicas(),
        };
        if object.status == desired {
            return false;
        }
        object.status = desired;
        object.metadata.resource_version = self.bump_version();
        let object = object.clone();
        self.emit(WatchEventType::Modified, &object);
        true
    }

    /// Settle every object of one kind
    pub fn settle_kind(&self, kind: WorkloadKind) -> usize {
        let refs: Vec<ResourceRef> = self
            .objects
            .read()
            .values()
            .filter(|o| o.kind == kind)
            .map(WorkloadObject::resource_ref)
            .collect();
        refs.iter().filter(|r| self.settle(r)).count()
    }

    /// Settle every object
    pub fn settle_all(&self) -> usize {
        WorkloadKind::ALL
            .into_iter()
            .map(|kind| self.settle_kind(kind))
            .sum()
    }

    /// Overwrite an object's status, as a controller would
    ///
    /// # Errors
    /// - `PlatformError::NotFound` if the object does not exist
    pub fn set_status(
        &self,
        resource: &ResourceRef,
        status: WorkloadStatus,
    ) -> Result<WorkloadObject, PlatformError> {
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(resource)
            .ok_or_else(|| PlatformError::NotFound(resource.clone()))?;
        object.status = status;
        object.metadata.resource_version = self.bump_version();
        let object = object.clone();
        self.emit(WatchEventType::Modified, &object);
        Ok(object)
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn sender(&self, kind: WorkloadKind) -> broadcast::Sender<WatchEvent> {
        self.channels
            .entry(kind)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }

    fn emit(&self, event_type: WatchEventType, object: &WorkloadObject) {
        // No receivers is fine
        let _ = self.sender(object.kind).send(WatchEvent {
            event_type,
            object: object.clone(),
        });
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn get(&self, resource: &ResourceRef) -> Result<WorkloadObject, PlatformError> {
        self.snapshot(resource)
            .ok_or_else(|| PlatformError::NotFound(resource.clone()))
    }

    async fn create(&self, mut object: WorkloadObject) -> Result<WorkloadObject, PlatformError> {
        let resource = object.resource_ref();
        if object.metadata.name.is_empty() {
            return Err(PlatformError::Invalid(format!(
                "{} requires a name",
                object.kind.kind_name()
            )));
        }
        let mut objects = self.objects.write();
        if objects.contains_key(&resource) {
            return Err(PlatformError::AlreadyExists(resource));
        }
        object.metadata.generation = 1;
        object.metadata.resource_version = self.bump_version();
        object.status = WorkloadStatus::default();
        objects.insert(resource, object.clone());
        self.emit(WatchEventType::Added, &object);
        Ok(object)
    }

    async fn update(&self, mut object: WorkloadObject) -> Result<WorkloadObject, PlatformError> {
        let resource = object.resource_ref();
        if let Some(error) = self.update_failures.lock().pop_front() {
            return Err(error);
        }
        let mut objects = self.objects.write();
        let current = objects
            .get_mut(&resource)
            .ok_or_else(|| PlatformError::NotFound(resource.clone()))?;
        if current.metadata.resource_version != object.metadata.resource_version {
            return Err(PlatformError::Conflict {
                resource,
                expected: object.metadata.resource_version,
                actual: current.metadata.resource_version,
            });
        }
        object.metadata.generation = if object.spec == current.spec {
            current.metadata.generation
        } else {
            current.metadata.generation + 1
        };
        object.metadata.resource_version = self.bump_version();
        object.status = current.status;
        *current = object.clone();
        self.emit(WatchEventType::Modified, &object);
        Ok(object)
    }

    async fn delete(
        &self,
        resource: &ResourceRef,
        propagation: DeletionPropagation,
    ) -> Result<(), PlatformError> {
        let removed = self
            .objects
            .write()
            .remove(resource)
            .ok_or_else(|| PlatformError::NotFound(resource.clone()))?;
        self.deletions.lock().push((resource.clone(), propagation));
        self.emit(WatchEventType::Deleted, &removed);
        Ok(())
    }

    fn watch(&self, kind: WorkloadKind) -> Result<WatchReceiver, PlatformError> {
        Ok(self.sender(kind).subscribe())
    }
}

/// Simulated workload controllers for an [`InMemoryPlatform`]
///
/// Each watched kind gets one task that settles objects after `delay`.
#[derive(Debug)]
pub struct ControllerSimulator {
    handles: Vec<JoinHandle<()>>,
}

impl ControllerSimulator {
    /// Start simulating controllers for `kinds`
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(platform: Arc<InMemoryPlatform>, kinds: &[WorkloadKind], delay: Duration) -> Self {
        let handles = kinds
            .iter()
            .filter_map(|&kind| {
                let rx = platform.watch(kind).ok()?;
                Some(tokio::spawn(simulate_kind(
                    Arc::clone(&platform),
                    kind,
                    rx,
                    delay,
                )))
            })
            .collect();
        Self { handles }
    }

    /// Stop all simulated controllers
    pub fn stop(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for ControllerSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn simulate_kind(
    platform: Arc<InMemoryPlatform>,
    kind: WorkloadKind,
    mut rx: WatchReceiver,
    delay: Duration,
) {
    loop {
        match rx.recv().await {
            Ok(event) if event.event_type != WatchEventType::Deleted => {
                let resource = event.object.resource_ref();
                let stale = platform
                    .snapshot(&resource)
                    .is_some_and(|o| !o.is_observed() || !o.is_fully_available());
                if !stale {
                    continue;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                platform.settle(&resource);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {
                platform.settle_kind(kind);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
