//! Core types for workload migration
//!
//! Defines the fundamental types shared by the orchestrator:
//! - Resource identity and the closed set of workload kinds
//! - Supported migration pairs
//! - Migration options, state and results

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use ulid::Ulid;

/// Unique migration task identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

const APPS_V1: &str = "apps/v1";
const KRUISE_V1ALPHA1: &str = "apps.kruise.io/v1alpha1";
const KRUISE_V1BETA1: &str = "apps.kruise.io/v1beta1";

/// Workload kinds the orchestrator knows how to read and write
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// Native `apps/v1` Deployment
    Deployment,
    /// Kruise CloneSet
    CloneSet,
    /// Native `apps/v1` DaemonSet
    DaemonSet,
    /// Kruise Advanced DaemonSet
    AdvancedDaemonSet,
    /// Native `apps/v1` StatefulSet
    StatefulSet,
    /// Kruise Advanced StatefulSet
    AdvancedStatefulSet,
}

impl WorkloadKind {
    /// All known kinds
    pub const ALL: [WorkloadKind; 6] = [
        WorkloadKind::Deployment,
        WorkloadKind::CloneSet,
        WorkloadKind::DaemonSet,
        WorkloadKind::AdvancedDaemonSet,
        WorkloadKind::StatefulSet,
        WorkloadKind::AdvancedStatefulSet,
    ];

    /// API version of this kind
    #[inline]
    #[must_use]
    pub const fn api_version(self) -> &'static str {
        match self {
            Self::Deployment | Self::DaemonSet | Self::StatefulSet => APPS_V1,
            Self::CloneSet | Self::AdvancedDaemonSet => KRUISE_V1ALPHA1,
            Self::AdvancedStatefulSet => KRUISE_V1BETA1,
        }
    }

    /// Kind name as served by the platform
    #[inline]
    #[must_use]
    pub const fn kind_name(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::CloneSet => "CloneSet",
            Self::DaemonSet | Self::AdvancedDaemonSet => "DaemonSet",
            Self::StatefulSet | Self::AdvancedStatefulSet => "StatefulSet",
        }
    }

    /// Resolve an `(apiVersion, kind)` pair
    #[must_use]
    pub fn from_type_meta(api_version: &str, kind: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.api_version() == api_version && k.kind_name() == kind)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.api_version(), self.kind_name())
    }
}

/// Identity of an object in the orchestration platform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// API version of the object
    pub api_version: String,
    /// Kind of the object
    pub kind: String,
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ResourceRef {
    /// Create a reference from raw type metadata
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a reference to an object of a known kind
    #[must_use]
    pub fn of(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind.api_version(), kind.kind_name(), namespace, name)
    }

    /// Reference to a Deployment
    #[must_use]
    pub fn deployment(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::of(WorkloadKind::Deployment, namespace, name)
    }

    /// Reference to a CloneSet
    #[must_use]
    pub fn cloneset(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::of(WorkloadKind::CloneSet, namespace, name)
    }

    /// Reference to a native DaemonSet
    #[must_use]
    pub fn daemonset(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::of(WorkloadKind::DaemonSet, namespace, name)
    }

    /// Reference to an Advanced DaemonSet
    #[must_use]
    pub fn advanced_daemonset(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::of(WorkloadKind::AdvancedDaemonSet, namespace, name)
    }

    /// Reference to a native StatefulSet
    #[must_use]
    pub fn statefulset(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::of(WorkloadKind::StatefulSet, namespace, name)
    }

    /// Reference to an Advanced StatefulSet
    #[must_use]
    pub fn advanced_statefulset(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::of(WorkloadKind::AdvancedStatefulSet, namespace, name)
    }

    /// Known workload kind of this reference, if any
    #[inline]
    #[must_use]
    pub fn workload_kind(&self) -> Option<WorkloadKind> {
        WorkloadKind::from_type_meta(&self.api_version, &self.kind)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{}",
            self.kind, self.api_version, self.namespace, self.name
        )
    }
}

/// How a pair is migrated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Incremental scale-out/scale-in under a surge budget
    BoundedSurge,
    /// Create the destination, then orphan-delete the source
    OneShot,
}

/// Supported source → destination kind pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationPair {
    /// Deployment → CloneSet
    DeploymentToCloneSet,
    /// DaemonSet → Advanced DaemonSet
    DaemonSetToAdvancedDaemonSet,
    /// StatefulSet → Advanced StatefulSet
    StatefulSetToAdvancedStatefulSet,
}

impl MigrationPair {
    /// Resolve the pair named by two references
    ///
    /// # Errors
    /// - `MigrationError::UnsupportedPair` for any combination outside the closed set
    pub fn resolve(src: &ResourceRef, dst: &ResourceRef) -> Result<Self, MigrationError> {
        let unsupported = || MigrationError::UnsupportedPair {
            src: src.clone(),
            dst: dst.clone(),
        };
        match (src.workload_kind(), dst.workload_kind()) {
            (Some(WorkloadKind::Deployment), Some(WorkloadKind::CloneSet)) => {
                Ok(Self::DeploymentToCloneSet)
            }
            (Some(WorkloadKind::DaemonSet), Some(WorkloadKind::AdvancedDaemonSet)) => {
                Ok(Self::DaemonSetToAdvancedDaemonSet)
            }
            (Some(WorkloadKind::StatefulSet), Some(WorkloadKind::AdvancedStatefulSet)) => {
                Ok(Self::StatefulSetToAdvancedStatefulSet)
            }
            _ => Err(unsupported()),
        }
    }

    /// Migration strategy for this pair
    #[inline]
    #[must_use]
    pub const fn strategy(self) -> Strategy {
        match self {
            Self::DeploymentToCloneSet => Strategy::BoundedSurge,
            Self::DaemonSetToAdvancedDaemonSet | Self::StatefulSetToAdvancedStatefulSet => {
                Strategy::OneShot
            }
        }
    }

    /// Source and destination kinds
    #[inline]
    #[must_use]
    pub const fn kinds(self) -> (WorkloadKind, WorkloadKind) {
        match self {
            Self::DeploymentToCloneSet => (WorkloadKind::Deployment, WorkloadKind::CloneSet),
            Self::DaemonSetToAdvancedDaemonSet => {
                (WorkloadKind::DaemonSet, WorkloadKind::AdvancedDaemonSet)
            }
            Self::StatefulSetToAdvancedStatefulSet => {
                (WorkloadKind::StatefulSet, WorkloadKind::AdvancedStatefulSet)
            }
        }
    }
}

/// Caller-supplied migration options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Replicas to migrate; defaults to the source's declared count
    pub replicas: Option<i32>,
    /// Maximum destination replicas above migrated source replicas; defaults to 1
    pub max_surge: Option<i32>,
    /// Give up after this many seconds (>0 if set); unset means no limit
    pub timeout_seconds: Option<i32>,
    /// One-shot and creation only: copy the source's declared replicas
    #[serde(default)]
    pub copy_replicas: bool,
}

impl MigrationOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With replicas
    #[inline]
    #[must_use]
    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    /// With max surge
    #[inline]
    #[must_use]
    pub fn with_max_surge(mut self, max_surge: i32) -> Self {
        self.max_surge = Some(max_surge);
        self
    }

    /// With timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_seconds(mut self, secs: i32) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    /// With replica copying
    #[inline]
    #[must_use]
    pub fn with_copy_replicas(mut self, copy: bool) -> Self {
        self.copy_replicas = copy;
        self
    }

    /// Check explicitly set values
    ///
    /// # Errors
    /// - `MigrationError::InvalidOptions` if `replicas <= 0`, `max_surge < 1`
    ///   or `timeout_seconds <= 0`
    pub fn validate(&self) -> Result<(), MigrationError> {
        if let Some(replicas) = self.replicas {
            if replicas <= 0 {
                return Err(MigrationError::InvalidOptions(format!(
                    "invalid replicas {replicas}"
                )));
            }
        }
        if let Some(max_surge) = self.max_surge {
            if max_surge < 1 {
                return Err(MigrationError::InvalidOptions(format!(
                    "maxSurge must be an integer greater than zero, got {max_surge}"
                )));
            }
        }
        if let Some(secs) = self.timeout_seconds {
            if secs <= 0 {
                return Err(MigrationError::InvalidOptions(format!(
                    "timeoutSeconds must be greater than zero, got {secs}"
                )));
            }
        }
        Ok(())
    }

    /// Fill in defaults against the source's declared replica count
    ///
    /// # Errors
    /// - `MigrationError::InvalidOptions` if validation fails or the resolved target is not positive
    pub fn resolve(&self, source_replicas: i32) -> Result<ResolvedOptions, MigrationError> {
        self.validate()?;
        let replicas = self.replicas.unwrap_or(source_replicas);
        if replicas <= 0 {
            return Err(MigrationError::InvalidOptions(format!(
                "invalid replicas {replicas}"
            )));
        }
        let timeout = self
            .timeout_seconds
            .map(|secs| Duration::from_secs(u64::from(secs.unsigned_abs())));
        Ok(ResolvedOptions {
            replicas,
            max_surge: self.max_surge.unwrap_or(1),
            timeout,
        })
    }
}

/// Options after defaulting at submit time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOptions {
    /// Target replica count
    pub replicas: i32,
    /// Surge budget
    pub max_surge: i32,
    /// Cooperative timeout
    pub timeout: Option<Duration>,
}

/// Lifecycle state of a migration task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    /// Still moving replicas
    Executing,
    /// All replicas migrated
    Succeeded,
    /// Gave up; see the result message
    Failed,
}

impl MigrationState {
    /// Returns true if this is a terminal state.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Executing => "Executing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a task's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Task ID
    pub id: TaskId,
    /// Current state
    pub state: MigrationState,
    /// Failure reason, empty otherwise
    pub message: String,
    /// Replicas removed from the source so far
    pub src_migrated_replicas: i32,
    /// Replicas added to the destination so far
    pub dst_migrated_replicas: i32,
}

impl MigrationResult {
    /// Fresh executing result
    #[inline]
    #[must_use]
    pub fn executing(id: TaskId) -> Self {
        Self {
            id,
            state: MigrationState::Executing,
            message: String::new(),
            src_migrated_replicas: 0,
            dst_migrated_replicas: 0,
        }
    }

    /// Immediately successful result
    #[inline]
    #[must_use]
    pub fn succeeded(id: TaskId) -> Self {
        Self {
            state: MigrationState::Succeeded,
            ..Self::executing(id)
        }
    }

    /// Whether the counters differ from another snapshot
    #[inline]
    #[must_use]
    pub fn progressed_since(&self, other: &MigrationResult) -> bool {
        self.src_migrated_replicas != other.src_migrated_replicas
            || self.dst_migrated_replicas != other.dst_migrated_replicas
    }
}

/// Options for creating a destination from a source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Copy the source's declared replicas instead of starting at zero
    pub copy_replicas: bool,
}
