//! Position ledger and move engine.
//!
//! Positions within a column are dense: always exactly {0, .., n-1}. The
//! `UNIQUE(column_id, position)` constraint is immediate, so a permutation
//! cannot be written in place. Every shift is two-phase inside the owning
//! transaction: affected rows are first parked on sentinel positions
//! (`-(position) - 1`, disjoint from all real positions and unique among
//! themselves), then written to their final slots. A concurrent writer that
//! touches the same slots hits the unique constraint and its transaction
//! aborts with no partial effect.

use super::history::{HistoryKind, record_history};
use super::{columns, deps, goals, now_ms, tasks, wip};
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeEvent, ChangeEventKind};
use crate::metrics::{self, Measurement};
use crate::types::{Column, ColumnRole, Task, TaskStatus};
use rusqlite::{Connection, params};

/// Park every task in `column_id` with position in `[lo, hi)` on its
/// sentinel. Pass `i64::MAX` for an open upper bound.
fn park_range(conn: &Connection, column_id: i64, lo: i64, hi: i64) -> EngineResult<usize> {
    let parked = conn.execute(
        "UPDATE tasks SET position = -position - 1
         WHERE column_id = ?1 AND position >= ?2 AND position < ?3",
        params![column_id, lo, hi],
    )?;
    Ok(parked)
}

/// Write parked tasks back to `original position + delta`.
fn unpark_shifted(conn: &Connection, column_id: i64, delta: i64) -> EngineResult<usize> {
    let restored = conn.execute(
        "UPDATE tasks SET position = -(position + 1) + ?2
         WHERE column_id = ?1 AND position < 0",
        params![column_id, delta],
    )?;
    Ok(restored)
}

/// Number of tasks currently in a column.
pub(crate) fn column_len(conn: &Connection, column_id: i64) -> EngineResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE column_id = ?1",
        params![column_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Close the gap left at `vacated` after a row left the column: every
/// remaining task above it shifts down one.
pub(crate) fn close_gap(conn: &Connection, column_id: i64, vacated: i64) -> EngineResult<()> {
    park_range(conn, column_id, vacated + 1, i64::MAX)?;
    unpark_shifted(conn, column_id, -1)?;
    Ok(())
}

/// Status and completion timestamp a task takes on when it lands in a column
/// with the given role.
///
/// Blocked tasks are exempt: the move clears `completed_at` but leaves the
/// blocked status for the dependency graph to lift.
pub(crate) fn status_for_role(
    role: ColumnRole,
    current: TaskStatus,
    completed_at: Option<i64>,
    now: i64,
) -> (TaskStatus, Option<i64>) {
    if current == TaskStatus::Blocked {
        return (TaskStatus::Blocked, None);
    }
    match role {
        ColumnRole::Ready | ColumnRole::Backlog => (TaskStatus::Open, None),
        ColumnRole::Doing | ColumnRole::Review | ColumnRole::Other => {
            (TaskStatus::InProgress, None)
        }
        ColumnRole::Done => (TaskStatus::Completed, Some(completed_at.unwrap_or(now))),
    }
}

/// Relocate `task` to `target_position` in `target` without triggering the
/// goal positioner. `target_position` of `None` appends; out-of-range values
/// clamp.
///
/// Returns the post-move task. The destination-role status policy is applied
/// whenever the column changes; a transition into `completed` runs the
/// dependency unblock scan in the same transaction and clears the claim
/// timestamps.
pub(crate) fn relocate_in_tx(
    conn: &Connection,
    events: &mut Vec<ChangeEvent>,
    task: &Task,
    target: &Column,
    target_position: Option<i64>,
    actor: Option<&str>,
) -> EngineResult<Task> {
    let now = now_ms();
    let source = columns::get_column_internal(conn, task.column_id)?;
    let same_column = source.id == target.id;

    if same_column {
        let len = column_len(conn, target.id)?;
        let new_pos = target_position.unwrap_or(len - 1).clamp(0, len - 1);
        let old_pos = task.position;

        if new_pos != old_pos {
            if new_pos > old_pos {
                // Closing a gap upward: the half-open range (old, new] shifts
                // down one.
                park_range(conn, target.id, old_pos + 1, new_pos + 1)?;
                conn.execute(
                    "UPDATE tasks SET position = ?1, updated_at = ?2 WHERE id = ?3",
                    params![new_pos, now, task.id],
                )?;
                unpark_shifted(conn, target.id, -1)?;
            } else {
                // Opening a gap downward: [new, old) shifts up one.
                park_range(conn, target.id, new_pos, old_pos)?;
                conn.execute(
                    "UPDATE tasks SET position = ?1, updated_at = ?2 WHERE id = ?3",
                    params![new_pos, now, task.id],
                )?;
                unpark_shifted(conn, target.id, 1)?;
            }

            record_history(
                conn,
                task,
                HistoryKind::Moved,
                Some(&source.name),
                Some(&target.name),
                actor,
            )?;
        }

        return tasks::get_task_internal(conn, task.id)?
            .ok_or_else(|| EngineError::task_not_found(task.id));
    }

    // Cross-column: admission control applies before anything mutates.
    wip::check_admission(conn, target, task.task_type)?;

    let dest_len = column_len(conn, target.id)?;
    let new_pos = target_position.unwrap_or(dest_len).clamp(0, dest_len);
    let old_pos = task.position;

    let (new_status, new_completed_at) =
        status_for_role(target.role(), task.status, task.completed_at, now);
    let completing = new_status == TaskStatus::Completed && task.status != TaskStatus::Completed;

    // Make room in the destination, land the task, then close the source gap.
    park_range(conn, target.id, new_pos, i64::MAX)?;
    conn.execute(
        "UPDATE tasks SET column_id = ?1, position = ?2, status = ?3, completed_at = ?4,
            updated_at = ?5 WHERE id = ?6",
        params![
            target.id,
            new_pos,
            new_status.as_str(),
            new_completed_at,
            now,
            task.id,
        ],
    )?;
    unpark_shifted(conn, target.id, 1)?;
    close_gap(conn, source.id, old_pos)?;

    if completing {
        // The claim ends with the work; assigned_to is kept as completion
        // metadata.
        conn.execute(
            "UPDATE tasks SET claimed_at = NULL, claim_expires_at = NULL WHERE id = ?1",
            params![task.id],
        )?;
        deps::unblock_dependents(conn, events, &task.identifier, task.board_id, actor)?;
    }

    let moved = tasks::get_task_internal(conn, task.id)?
        .ok_or_else(|| EngineError::task_not_found(task.id))?;

    record_history(
        conn,
        &moved,
        HistoryKind::Moved,
        Some(&source.name),
        Some(&target.name),
        actor,
    )?;

    if completing {
        metrics::record(Measurement::Completed, &moved, actor);
    } else if target.role() == ColumnRole::Review {
        metrics::record(Measurement::MovedToReview, &moved, actor);
    }

    Ok(moved)
}

/// Move a task within or across columns, applying the destination status
/// policy and resynchronizing the parent goal.
pub(crate) fn move_task_in_tx(
    conn: &Connection,
    events: &mut Vec<ChangeEvent>,
    task_id: i64,
    target_column_id: i64,
    target_position: Option<i64>,
    actor: Option<&str>,
) -> EngineResult<Task> {
    let task = tasks::get_task_internal(conn, task_id)?
        .ok_or_else(|| EngineError::task_not_found(task_id))?;
    let target = columns::get_column_internal(conn, target_column_id)?;

    if target.board_id != task.board_id {
        return Err(EngineError::invalid_value(
            "target_column_id",
            "Cannot move a task to a column on another board",
        ));
    }

    let moved = relocate_in_tx(conn, events, &task, &target, target_position, actor)?;

    events.push(ChangeEvent {
        kind: ChangeEventKind::TaskMoved,
        board_id: moved.board_id,
        task: moved.clone(),
    });

    if let Some(parent_id) = moved.parent_id {
        goals::resync_goal_in_tx(conn, events, parent_id, actor)?;
    }

    Ok(moved)
}

use super::Database;

impl Database {
    /// Move a task to a column and position.
    ///
    /// `target_position` of `None` appends to the column; out-of-range values
    /// clamp. On any failure the transaction aborts and no position, status
    /// or claim change persists.
    pub fn move_task(
        &self,
        task_id: i64,
        target_column_id: i64,
        target_position: Option<i64>,
        actor: Option<&str>,
    ) -> EngineResult<Task> {
        self.in_transaction(|tx, events| {
            move_task_in_tx(tx, events, task_id, target_column_id, target_position, actor)
        })
    }
}
