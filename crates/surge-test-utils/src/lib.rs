//! Testing utilities for the surge workspace
//!
//! Shared fixtures: workload builders, a seeded in-memory platform and wait helpers.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    poll_until_terminal, ControllerSimulator, InMemoryPlatform, MigrationControl,
    MigrationResult, Migrator, MigratorConfig, RateLimiterConfig, ResourceRef, TaskId,
    WorkloadKind, WorkloadObject,
};

pub const NAMESPACE: &str = "default";

fn workload(kind: WorkloadKind, name: &str, replicas: Option<i32>) -> WorkloadObject {
    let mut object = WorkloadObject::new(kind, NAMESPACE, name);
    object.metadata.labels.insert("app".into(), name.into());
    object.spec.replicas = replicas;
    object.spec.selector.insert("app".into(), name.into());
    object.spec.template = serde_json::json!({
        "metadata": {"labels": {"app": name}},
        "spec": {"containers": [{"name": name, "image": "nginx:1.25"}]}
    });
    object
}

pub fn deployment(name: &str, replicas: i32) -> WorkloadObject {
    workload(WorkloadKind::Deployment, name, Some(replicas))
}

pub fn cloneset(name: &str, replicas: i32) -> WorkloadObject {
    workload(WorkloadKind::CloneSet, name, Some(replicas))
}

pub fn daemonset(name: &str) -> WorkloadObject {
    let mut object = workload(WorkloadKind::DaemonSet, name, None);
    object.spec.update_strategy.strategy_type = "RollingUpdate".into();
    object
}

pub fn statefulset(name: &str, replicas: i32) -> WorkloadObject {
    let mut object = workload(WorkloadKind::StatefulSet, name, Some(replicas));
    object.spec.service_name = Some(format!("{name}-headless"));
    object.spec.volume_claim_templates = vec![serde_json::json!({"metadata": {"name": "data"}})];
    object
}

/// Seed objects and report them fully rolled out
pub fn seeded_platform(objects: Vec<WorkloadObject>) -> Arc<InMemoryPlatform> {
    let platform = Arc::new(InMemoryPlatform::new());
    for object in objects {
        platform.insert(object);
    }
    platform.settle_all();
    platform
}

/// A settled Deployment `web` and CloneSet `web-cs`
pub fn deployment_pair(
    src_replicas: i32,
    dst_replicas: i32,
) -> (Arc<InMemoryPlatform>, ResourceRef, ResourceRef) {
    let platform = seeded_platform(vec![
        deployment("web", src_replicas),
        cloneset("web-cs", dst_replicas),
    ]);
    (
        platform,
        ResourceRef::deployment(NAMESPACE, "web"),
        ResourceRef::cloneset(NAMESPACE, "web-cs"),
    )
}

pub fn test_config() -> MigratorConfig {
    MigratorConfig::new()
        .with_workers(2)
        .with_rate_limiter(RateLimiterConfig {
            base_delay_ms: 1,
            max_delay_ms: 50,
        })
}

/// Migrator plus simulated controllers for the bounded-surge kinds
pub fn setup_test_migrator(platform: &Arc<InMemoryPlatform>) -> (Migrator, ControllerSimulator) {
    let simulator = ControllerSimulator::spawn(
        Arc::clone(platform),
        &[WorkloadKind::Deployment, WorkloadKind::CloneSet],
        Duration::from_millis(1),
    );
    let migrator = Migrator::start(platform.clone(), test_config());
    (migrator, simulator)
}

pub async fn wait_for_terminal<C>(control: &C, id: TaskId) -> MigrationResult
where
    C: MigrationControl + ?Sized,
{
    poll_until_terminal(
        control,
        id,
        Duration::from_millis(5),
        Duration::from_secs(10),
        |_| {},
    )
    .await
    .unwrap()
}

/// Poll `condition` until it holds or panic after a few seconds
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
