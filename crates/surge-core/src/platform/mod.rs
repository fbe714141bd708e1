//! Platform client boundary
//!
//! The orchestrator never talks to the orchestration platform directly; it
//! goes through [`PlatformClient`]. Objects are modelled as one
//! [`WorkloadObject`] shape covering the closed set of [`WorkloadKind`]s.

pub mod memory;

use crate::error::PlatformError;
use crate::types::{ResourceRef, WorkloadKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

pub use memory::{ControllerSimulator, InMemoryPlatform};

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Finalizers
    #[serde(default)]
    pub finalizers: Vec<String>,
    /// Incremented by the platform on every spec change
    #[serde(default)]
    pub generation: i64,
    /// Opaque version used for optimistic concurrency
    #[serde(default)]
    pub resource_version: u64,
}

/// Rolling update bounds (absolute counts or percentages, kept verbatim)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    /// Max unavailable during update
    pub max_unavailable: Option<String>,
    /// Max surge during update
    pub max_surge: Option<String>,
    /// StatefulSet partition
    pub partition: Option<i32>,
}

/// Update strategy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    /// Strategy type (`RollingUpdate`, `Recreate`, `OnDelete`, ...)
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Rolling parameters
    pub rolling_update: Option<RollingUpdate>,
    /// Whether rollout is paused
    #[serde(default)]
    pub paused: bool,
}

/// Declarative workload spec
///
/// Kind-specific fields are optional; converters carry them across.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Declared replica count (absent for DaemonSets)
    pub replicas: Option<i32>,
    /// Label selector
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Pod template, kept opaque
    #[serde(default)]
    pub template: serde_json::Value,
    /// Update strategy
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    /// Minimum seconds a pod must be ready to count as available
    #[serde(default)]
    pub min_ready_seconds: i32,
    /// Old revisions to retain
    pub revision_history_limit: Option<i32>,
    /// StatefulSet governing service
    pub service_name: Option<String>,
    /// StatefulSet volume claim templates, kept opaque
    #[serde(default)]
    pub volume_claim_templates: Vec<serde_json::Value>,
    /// StatefulSet pod management policy
    pub pod_management_policy: Option<String>,
}

/// Status reported by the workload's own controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// Generation the controller last processed
    pub observed_generation: i64,
    /// Pods created
    pub replicas: i32,
    /// Pods available for at least `min_ready_seconds`
    pub available_replicas: i32,
}

/// A workload object as stored by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadObject {
    /// Kind of the object
    pub kind: WorkloadKind,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Desired state
    pub spec: WorkloadSpec,
    /// Observed state
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl WorkloadObject {
    /// Create an object with empty spec
    #[must_use]
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            metadata: ObjectMeta {
                namespace: namespace.into(),
                name: name.into(),
                ..ObjectMeta::default()
            },
            spec: WorkloadSpec::default(),
            status: WorkloadStatus::default(),
        }
    }

    /// Identity of this object
    #[must_use]
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::of(self.kind, &self.metadata.namespace, &self.metadata.name)
    }

    /// Declared replicas, zero when unset
    #[inline]
    #[must_use]
    pub fn declared_replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(0)
    }

    /// Whether the controller has processed the latest spec
    #[inline]
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.status.observed_generation == self.metadata.generation
    }

    /// Whether every declared replica is available
    #[inline]
    #[must_use]
    pub fn is_fully_available(&self) -> bool {
        self.declared_replicas() == self.status.available_replicas
    }
}

/// What happened to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    /// Object created
    Added,
    /// Object spec, status or metadata changed
    Modified,
    /// Object removed
    Deleted,
}

/// Change notification delivered to watchers
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Event type
    pub event_type: WatchEventType,
    /// Object after the change (last state for deletions)
    pub object: WorkloadObject,
}

/// Receiving end of a per-kind watch
pub type WatchReceiver = broadcast::Receiver<WatchEvent>;

/// How dependents are treated when a parent is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPropagation {
    /// Leave dependents running, unowned
    Orphan,
    /// Delete dependents in the background
    Background,
    /// Delete dependents before the parent
    Foreground,
}

/// Read/write/watch access to the orchestration platform
#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch an object
    async fn get(&self, resource: &ResourceRef) -> Result<WorkloadObject, PlatformError>;

    /// Create an object, returning it as stored
    async fn create(&self, object: WorkloadObject) -> Result<WorkloadObject, PlatformError>;

    /// Replace an object's metadata and spec, returning it as stored
    ///
    /// Fails with `Conflict` when `metadata.resource_version` is stale.
    async fn update(&self, object: WorkloadObject) -> Result<WorkloadObject, PlatformError>;

    /// Delete an object
    async fn delete(
        &self,
        resource: &ResourceRef,
        propagation: DeletionPropagation,
    ) -> Result<(), PlatformError>;

    /// Subscribe to add/update/delete events for one kind
    fn watch(&self, kind: WorkloadKind) -> Result<WatchReceiver, PlatformError>;
}
