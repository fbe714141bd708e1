//! Converters between source and destination workload kinds
//!
//! Pure functions: the source is never modified and the result carries no
//! platform-managed metadata (generation, resource version, status).

use crate::platform::{ObjectMeta, UpdateStrategy, WorkloadObject, WorkloadSpec, WorkloadStatus};
use crate::types::WorkloadKind;

/// CloneSet update strategy type used for migrated Deployments
pub const CLONESET_RECREATE_STRATEGY: &str = "ReCreate";

fn carried_metadata(from: &WorkloadObject, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: from.metadata.namespace.clone(),
        name: name.to_string(),
        labels: from.metadata.labels.clone(),
        annotations: from.metadata.annotations.clone(),
        finalizers: from.metadata.finalizers.clone(),
        generation: 0,
        resource_version: 0,
    }
}

/// Deployment → CloneSet
///
/// Rolling update bounds and the paused flag carry over; the CloneSet
/// recreates pods on update.
#[must_use]
pub fn deployment_to_cloneset(deployment: &WorkloadObject, name: &str) -> WorkloadObject {
    let from = &deployment.spec;
    WorkloadObject {
        kind: WorkloadKind::CloneSet,
        metadata: carried_metadata(deployment, name),
        spec: WorkloadSpec {
            replicas: from.replicas,
            selector: from.selector.clone(),
            template: from.template.clone(),
            update_strategy: UpdateStrategy {
                strategy_type: CLONESET_RECREATE_STRATEGY.to_string(),
                rolling_update: from.update_strategy.rolling_update.clone(),
                paused: from.update_strategy.paused,
            },
            min_ready_seconds: from.min_ready_seconds,
            revision_history_limit: from.revision_history_limit,
            ..WorkloadSpec::default()
        },
        status: WorkloadStatus::default(),
    }
}

/// DaemonSet → Advanced DaemonSet
///
/// Only labels, selector, template and the update strategy type are carried.
#[must_use]
pub fn daemonset_to_advanced_daemonset(daemonset: &WorkloadObject, name: &str) -> WorkloadObject {
    let from = &daemonset.spec;
    let mut metadata = carried_metadata(daemonset, name);
    metadata.annotations.clear();
    metadata.finalizers.clear();
    WorkloadObject {
        kind: WorkloadKind::AdvancedDaemonSet,
        metadata,
        spec: WorkloadSpec {
            selector: from.selector.clone(),
            template: from.template.clone(),
            update_strategy: UpdateStrategy {
                strategy_type: from.update_strategy.strategy_type.clone(),
                ..UpdateStrategy::default()
            },
            ..WorkloadSpec::default()
        },
        status: WorkloadStatus::default(),
    }
}

/// StatefulSet → Advanced StatefulSet
///
/// Identity-bearing fields (service name, volume claim templates, pod
/// management policy) carry over verbatim.
#[must_use]
pub fn statefulset_to_advanced_statefulset(
    statefulset: &WorkloadObject,
    name: &str,
) -> WorkloadObject {
    let from = &statefulset.spec;
    let mut metadata = carried_metadata(statefulset, name);
    metadata.annotations.clear();
    metadata.finalizers.clear();
    WorkloadObject {
        kind: WorkloadKind::AdvancedStatefulSet,
        metadata,
        spec: WorkloadSpec {
            replicas: from.replicas,
            selector: from.selector.clone(),
            template: from.template.clone(),
            update_strategy: from.update_strategy.clone(),
            revision_history_limit: from.revision_history_limit,
            service_name: from.service_name.clone(),
            volume_claim_templates: from.volume_claim_templates.clone(),
            pod_management_policy: from.pod_management_policy.clone(),
            ..WorkloadSpec::default()
        },
        status: WorkloadStatus::default(),
    }
}
