//! Measurement emission points for the observability collaborator.
//!
//! One emission per significant transition, tagged with task, board and actor
//! identifiers. The sink is whatever `tracing` subscriber the embedder
//! installs; the engine only defines the emission points.

use crate::types::Task;

const TARGET: &str = "kanban_engine::metrics";

/// Kind of transition being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    Created,
    Claimed,
    MovedToReview,
    Completed,
    Unblocked,
}

impl Measurement {
    fn as_str(&self) -> &'static str {
        match self {
            Measurement::Created => "task_created",
            Measurement::Claimed => "task_claimed",
            Measurement::MovedToReview => "task_moved_to_review",
            Measurement::Completed => "task_completed",
            Measurement::Unblocked => "task_unblocked",
        }
    }
}

/// Emit one measurement for a transition on `task`.
pub fn record(measurement: Measurement, task: &Task, actor: Option<&str>) {
    tracing::info!(
        target: TARGET,
        measurement = measurement.as_str(),
        task = %task.identifier,
        task_id = task.id,
        board_id = task.board_id,
        task_type = task.task_type.as_str(),
        actor = actor.unwrap_or("-"),
    );
}
