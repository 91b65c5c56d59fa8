//! Goal hierarchy positioner.
//!
//! A goal is a container task whose column and position are derived from its
//! children: it sits in the lowest-ordinal column containing a child (or Done
//! once every child is there), positioned after any goals already clustered
//! at the top of that column and strictly before all of its own children.

use super::{Database, columns, positions, tasks};
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeEvent, ChangeEventKind};
use crate::types::{ColumnRole, Task, TaskType};
use rusqlite::{Connection, params};

/// Direct children of a goal, ordered by column then position.
pub(crate) fn children_of(conn: &Connection, goal_id: i64) -> EngineResult<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM tasks WHERE parent_id = ?1 ORDER BY column_id, position",
    )?;
    let children = stmt
        .query_map(params![goal_id], tasks::parse_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(children)
}

/// Position at which a goal should be inserted into `column_id`: after the
/// last other goal that precedes its children, never past the earliest child.
fn goal_insert_position(
    conn: &Connection,
    column_id: i64,
    goal_id: i64,
    min_child_pos: i64,
) -> EngineResult<i64> {
    let after_goals: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM tasks
         WHERE column_id = ?1 AND task_type = 'goal' AND id != ?2 AND position < ?3",
        params![column_id, goal_id, min_child_pos],
        |row| row.get(0),
    )?;
    Ok(after_goals.min(min_child_pos))
}

/// Re-derive a goal's column and position from its children's placement.
///
/// Invoked after any child's column changes. A goal with no remaining
/// children is left untouched; deletion of the last child removes the goal
/// through the deletion path instead.
pub(crate) fn resync_goal_in_tx(
    conn: &Connection,
    events: &mut Vec<ChangeEvent>,
    goal_id: i64,
    actor: Option<&str>,
) -> EngineResult<()> {
    let goal = tasks::get_task_internal(conn, goal_id)?
        .ok_or_else(|| EngineError::task_not_found(goal_id))?;
    if goal.task_type != TaskType::Goal {
        return Err(EngineError::invalid_value(
            "parent_id",
            "Parent task is not a goal",
        ));
    }

    let children = children_of(conn, goal_id)?;
    if children.is_empty() {
        return Ok(());
    }

    let board_columns = columns::list_columns_internal(conn, goal.board_id)?;
    let done = board_columns.iter().find(|c| c.role() == ColumnRole::Done);

    let target = match done {
        Some(d) if children.iter().all(|c| c.column_id == d.id) => d.clone(),
        _ => board_columns
            .iter()
            // Lowest board-ordinal column containing at least one child.
            .find(|col| children.iter().any(|c| c.column_id == col.id))
            .cloned()
            .ok_or_else(|| {
                EngineError::internal("goal children reference columns off the board")
            })?,
    };

    let min_child_pos = children
        .iter()
        .filter(|c| c.column_id == target.id)
        .map(|c| c.position)
        .min()
        .unwrap_or(0);
    let insert_pos = goal_insert_position(conn, target.id, goal.id, min_child_pos)?;

    let needs_move = goal.column_id != target.id;
    // Same column: only shuffle when a child has slipped above the goal.
    let needs_reorder = !needs_move && goal.position > min_child_pos;

    if needs_move || needs_reorder {
        let moved =
            positions::relocate_in_tx(conn, events, &goal, &target, Some(insert_pos), actor)?;
        events.push(ChangeEvent {
            kind: ChangeEventKind::TaskMoved,
            board_id: moved.board_id,
            task: moved,
        });
    }

    Ok(())
}

/// Remove a goal that has just lost its last child. Returns the deleted
/// snapshot, or `None` if children remain.
pub(crate) fn delete_goal_if_childless(
    conn: &Connection,
    events: &mut Vec<ChangeEvent>,
    goal_id: i64,
) -> EngineResult<Option<Task>> {
    let goal = tasks::get_task_internal(conn, goal_id)?
        .ok_or_else(|| EngineError::task_not_found(goal_id))?;
    if !children_of(conn, goal_id)?.is_empty() {
        return Ok(None);
    }

    conn.execute("DELETE FROM tasks WHERE id = ?1", params![goal.id])?;
    positions::close_gap(conn, goal.column_id, goal.position)?;

    events.push(ChangeEvent {
        kind: ChangeEventKind::TaskDeleted,
        board_id: goal.board_id,
        task: goal.clone(),
    });
    Ok(Some(goal))
}

impl Database {
    /// Promote a goal: move it and every child currently sitting in a
    /// Backlog column into Ready, preserving the children's relative order,
    /// in one transaction.
    pub fn promote_goal(&self, goal_id: i64, actor: Option<&str>) -> EngineResult<Task> {
        self.in_transaction(|tx, events| {
            let goal = tasks::get_task_internal(tx, goal_id)?
                .ok_or_else(|| EngineError::task_not_found(goal_id))?;
            if goal.task_type != TaskType::Goal {
                return Err(EngineError::invalid_value(
                    "goal_id",
                    "Only goal tasks can be promoted",
                ));
            }

            let ready = columns::find_column_by_role(tx, goal.board_id, ColumnRole::Ready)?
                .ok_or_else(|| {
                    EngineError::new(
                        crate::error::ErrorCode::ColumnNotFound,
                        "Board has no Ready column",
                    )
                })?;

            let backlog_children: Vec<Task> = children_of(tx, goal_id)?
                .into_iter()
                .filter(|child| {
                    columns::get_column_internal(tx, child.column_id)
                        .map(|c| c.role() == ColumnRole::Backlog)
                        .unwrap_or(false)
                })
                .collect();

            for child in &backlog_children {
                // Re-read: earlier relocations shift positions under us.
                let current = tasks::get_task_internal(tx, child.id)?
                    .ok_or_else(|| EngineError::task_not_found(child.id))?;
                let moved = positions::relocate_in_tx(tx, events, &current, &ready, None, actor)?;
                events.push(ChangeEvent {
                    kind: ChangeEventKind::TaskMoved,
                    board_id: moved.board_id,
                    task: moved,
                });
            }

            resync_goal_in_tx(tx, events, goal_id, actor)?;

            tasks::get_task_internal(tx, goal_id)?
                .ok_or_else(|| EngineError::task_not_found(goal_id))
        })
    }
}
