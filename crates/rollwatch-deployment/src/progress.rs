//! Task progress classification.

use rollwatch_state::{Task, TaskStatus};

/// Whether the tasks of a deployment have all left `PENDING`.
///
/// An empty task list is never complete: nothing has been observed yet.
pub fn is_deployment_completed(tasks: &[Task]) -> bool {
    !tasks.is_empty() && tasks.iter().all(|t| t.last_status != TaskStatus::Pending)
}
