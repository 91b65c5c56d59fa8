//! WIP governor: admission control on column occupancy.
//!
//! Consulted before task creation and before cross-column moves, never before
//! same-column reorders. Goal-type tasks are exempt on both sides: they do not
//! count toward occupancy and are always admitted.

use crate::error::{EngineError, EngineResult};
use crate::types::{Column, TaskType};
use rusqlite::{Connection, params};

/// Count the tasks in `column_id` that occupy WIP capacity.
pub(crate) fn wip_occupancy(conn: &Connection, column_id: i64) -> EngineResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks
         WHERE column_id = ?1 AND task_type IN ('work', 'defect')",
        params![column_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Check whether a task of `task_type` may enter `column`.
///
/// Returns a capacity error without mutating anything when the column is
/// full. `wip_limit` of 0 means unlimited.
pub(crate) fn check_admission(
    conn: &Connection,
    column: &Column,
    task_type: TaskType,
) -> EngineResult<()> {
    if !task_type.counts_against_wip() {
        return Ok(());
    }
    if column.wip_limit == 0 {
        return Ok(());
    }

    let occupied = wip_occupancy(conn, column.id)?;
    if occupied >= column.wip_limit {
        return Err(EngineError::wip_limit(&column.name, column.wip_limit));
    }
    Ok(())
}
