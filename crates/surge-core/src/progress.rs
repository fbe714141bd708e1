//! Caller-side progress polling

use crate::error::MigrationError;
use crate::migrator::MigrationControl;
use crate::types::{MigrationResult, TaskId};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Poll a task until it reaches a terminal state
///
/// `on_progress` runs for the first snapshot and again whenever the migrated
/// counters change. Submits nothing and never cancels the task.
///
/// # Errors
/// - `MigrationError::TaskNotFound` if the task is unknown or gets evicted
/// - `MigrationError::Timeout` if `deadline` passes before the task finishes
pub async fn poll_until_terminal<C, F>(
    control: &C,
    id: TaskId,
    interval: Duration,
    deadline: Duration,
    mut on_progress: F,
) -> Result<MigrationResult, MigrationError>
where
    C: MigrationControl + ?Sized,
    F: FnMut(&MigrationResult),
{
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<MigrationResult> = None;

    loop {
        ticker.tick().await;
        let result = control.query(id)?;
        if last.as_ref().map_or(true, |prev| result.progressed_since(prev)) {
            on_progress(&result);
        }
        if result.state.is_terminal() {
            return Ok(result);
        }
        if started.elapsed() >= deadline {
            tracing::debug!(task = %id, "gave up waiting for migration");
            return Err(MigrationError::Timeout {
                id,
                duration_secs: deadline.as_secs(),
            });
        }
        last = Some(result);
    }
}
