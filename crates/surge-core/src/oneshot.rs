//! One-shot migrations and destination creation
//!
//! DaemonSets and StatefulSets move in a single step: the destination is
//! created from the converted source and the source is deleted with orphan
//! propagation so running pods are adopted rather than killed. There is no
//! health check between the two calls and no rollback if the delete fails.

use crate::convert;
use crate::error::{MigrationError, PlatformError};
use crate::platform::{DeletionPropagation, PlatformClient, WorkloadObject};
use crate::store::{MigrationTask, TaskStore};
use crate::types::{CreateOptions, MigrationPair, MigrationResult, ResourceRef};
use std::sync::Arc;

/// Migrate a one-shot pair to completion
///
/// Nothing is stored unless every platform call succeeds.
///
/// # Errors
/// - `MigrationError::AlreadyExecuting` if an executing task owns either resource
/// - `MigrationError::DestinationExists` if the destination is already present
/// - `MigrationError::Platform` if reading, creating or deleting fails
pub async fn migrate(
    platform: &dyn PlatformClient,
    store: &TaskStore,
    pair: MigrationPair,
    src: ResourceRef,
    dst: ResourceRef,
    copy_replicas: bool,
) -> Result<MigrationResult, MigrationError> {
    {
        let writer = store.write();
        writer.ensure_available(&src)?;
        writer.ensure_available(&dst)?;
    }

    let source = platform.get(&src).await?;
    ensure_absent(platform, &dst).await?;

    let mut destination = match pair {
        MigrationPair::DaemonSetToAdvancedDaemonSet => {
            convert::daemonset_to_advanced_daemonset(&source, &dst.name)
        }
        MigrationPair::StatefulSetToAdvancedStatefulSet => {
            let mut converted = convert::statefulset_to_advanced_statefulset(&source, &dst.name);
            if !copy_replicas {
                converted.spec.replicas = Some(0);
            }
            converted
        }
        MigrationPair::DeploymentToCloneSet => {
            return Err(MigrationError::InvalidOptions(format!(
                "{src} is migrated incrementally, not in one shot"
            )))
        }
    };
    destination.metadata.namespace.clone_from(&dst.namespace);

    let created = platform.create(destination).await.map_err(|e| match e {
        PlatformError::AlreadyExists(r) => MigrationError::DestinationExists(r),
        other => MigrationError::Platform(other),
    })?;
    platform.delete(&src, DeletionPropagation::Orphan).await?;

    let task = Arc::new(MigrationTask::completed(
        src,
        dst,
        pair,
        created.declared_replicas(),
    ));
    store.write().insert(Arc::clone(&task));
    tracing::info!(
        task = %task.id,
        src = %task.src,
        dst = %task.dst,
        replicas = created.declared_replicas(),
        "one-shot migration finished, source orphan-deleted"
    );
    Ok(task.snapshot())
}

/// Create a CloneSet from a Deployment without moving any replicas
///
/// The CloneSet starts with zero replicas unless `copy_replicas` is set.
///
/// # Errors
/// - `MigrationError::UnsupportedPair` unless the refs name a Deployment and a CloneSet
/// - `MigrationError::DestinationExists` if the CloneSet is already present
/// - `MigrationError::Platform` if reading or creating fails
pub async fn create_destination(
    platform: &dyn PlatformClient,
    src: &ResourceRef,
    dst: &ResourceRef,
    opts: CreateOptions,
) -> Result<WorkloadObject, MigrationError> {
    if MigrationPair::resolve(src, dst)? != MigrationPair::DeploymentToCloneSet {
        return Err(MigrationError::UnsupportedPair {
            src: src.clone(),
            dst: dst.clone(),
        });
    }

    let deployment = platform.get(src).await?;
    ensure_absent(platform, dst).await?;

    let mut cloneset = convert::deployment_to_cloneset(&deployment, &dst.name);
    cloneset.metadata.namespace.clone_from(&dst.namespace);
    if !opts.copy_replicas {
        cloneset.spec.replicas = Some(0);
    }

    let created = platform.create(cloneset).await.map_err(|e| match e {
        PlatformError::AlreadyExists(r) => MigrationError::DestinationExists(r),
        other => MigrationError::Platform(other),
    })?;
    tracing::info!(src = %src, dst = %dst, replicas = created.declared_replicas(), "created destination");
    Ok(created)
}

async fn ensure_absent(platform: &dyn PlatformClient, dst: &ResourceRef) -> Result<(), MigrationError> {
    match platform.get(dst).await {
        Ok(_) => Err(MigrationError::DestinationExists(dst.clone())),
        Err(PlatformError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
