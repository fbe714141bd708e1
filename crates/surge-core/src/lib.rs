//! Surge Core - bounded-surge workload migration
//!
//! Moves replicas from a source workload to a destination workload while
//! keeping total capacity within a surge budget:
//! - Validates and records migration tasks, one per resource at a time
//! - Wakes tasks from platform watch events through a deduplicating queue
//! - Reconciles each task one scale-out or scale-in step at a time
//! - Migrates DaemonSets and StatefulSets in one shot
//!
//! # Example
//!
//! ```rust,ignore
//! use surge_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(platform: Arc<dyn PlatformClient>) -> Result<(), MigrationError> {
//! let migrator = Migrator::start(platform, MigratorConfig::new());
//!
//! let result = migrator
//!     .submit(
//!         ResourceRef::deployment("default", "web"),
//!         ResourceRef::cloneset("default", "web"),
//!         MigrationOptions::new().with_max_surge(2),
//!     )
//!     .await?;
//!
//! println!("Started task {}", result.id);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod convert;
pub mod error;
pub mod migrator;
pub mod oneshot;
pub mod platform;
pub mod progress;
pub mod queue;
pub mod reconciler;
pub mod store;
pub mod surge;
pub mod types;
pub mod watch;
pub mod worker;

// Re-exports for convenience
pub use config::{MigratorConfig, RateLimiterConfig, RetentionPolicy};
pub use error::{MigrationError, PlatformError, ReconcileError};
pub use migrator::{MigrationControl, Migrator, QUEUE_NAME};
pub use platform::{
    ControllerSimulator, DeletionPropagation, InMemoryPlatform, ObjectMeta, PlatformClient,
    WatchEvent, WatchEventType, WorkloadObject, WorkloadSpec, WorkloadStatus,
};
pub use progress::poll_until_terminal;
pub use queue::WorkQueue;
pub use store::{MigrationTask, TaskStore};
pub use surge::{plan_step, Counters, Observed, Step, WaitReason};
pub use types::{
    CreateOptions, MigrationOptions, MigrationPair, MigrationResult, MigrationState,
    ResolvedOptions, ResourceRef, Strategy, TaskId, WorkloadKind,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Surge Core
    pub use crate::{
        poll_until_terminal, CreateOptions, MigrationControl, MigrationError, MigrationOptions,
        MigrationResult, MigrationState, Migrator, MigratorConfig, PlatformClient, ResourceRef,
        TaskId, WorkloadKind,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
