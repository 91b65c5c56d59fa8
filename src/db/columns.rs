//! Board and column reads, plus the minimal creation surface the engine and
//! its tests need. Column management beyond these fields lives with the board
//! collaborator.

use super::{Database, now_ms};
use crate::error::{EngineError, EngineResult};
use crate::types::{Board, Column, ColumnRole};
use rusqlite::{Connection, Row, params};

pub(crate) fn parse_column_row(row: &Row) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get("id")?,
        board_id: row.get("board_id")?,
        name: row.get("name")?,
        position: row.get("position")?,
        wip_limit: row.get("wip_limit")?,
    })
}

/// Fetch a column or fail with a structured not-found error. A missing column
/// referenced by an existing task is an exceptional condition, not an
/// expected outcome.
pub(crate) fn get_column_internal(conn: &Connection, column_id: i64) -> EngineResult<Column> {
    let mut stmt = conn.prepare(
        "SELECT id, board_id, name, position, wip_limit FROM columns WHERE id = ?1",
    )?;
    match stmt.query_row(params![column_id], parse_column_row) {
        Ok(column) => Ok(column),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(EngineError::column_not_found(column_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// List a board's columns in board-ordinal order.
pub(crate) fn list_columns_internal(conn: &Connection, board_id: i64) -> EngineResult<Vec<Column>> {
    let mut stmt = conn.prepare(
        "SELECT id, board_id, name, position, wip_limit FROM columns
         WHERE board_id = ?1 ORDER BY position",
    )?;
    let columns = stmt
        .query_map(params![board_id], parse_column_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Find the first column on a board matching a role, by name.
pub(crate) fn find_column_by_role(
    conn: &Connection,
    board_id: i64,
    role: ColumnRole,
) -> EngineResult<Option<Column>> {
    let columns = list_columns_internal(conn, board_id)?;
    Ok(columns.into_iter().find(|c| c.role() == role))
}

impl Database {
    /// Create a board.
    pub fn create_board(&self, name: &str) -> EngineResult<Board> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO boards (name, created_at) VALUES (?1, ?2)",
                params![name, now],
            )?;
            Ok(Board {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
            })
        })
    }

    /// Create a column at the end of a board. `wip_limit` of `None` uses the
    /// configured default; 0 means unlimited.
    pub fn create_column(
        &self,
        board_id: i64,
        name: &str,
        wip_limit: Option<i64>,
    ) -> EngineResult<Column> {
        let now = now_ms();
        let wip_limit = wip_limit.unwrap_or(self.config().default_wip_limit);
        if wip_limit < 0 {
            return Err(EngineError::invalid_value(
                "wip_limit",
                "WIP limit must be zero or positive",
            ));
        }

        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM boards WHERE id = ?1)",
                params![board_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(EngineError::board_not_found(board_id));
            }

            let position: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM columns WHERE board_id = ?1",
                params![board_id],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO columns (board_id, name, position, wip_limit, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![board_id, name, position, wip_limit, now],
            )?;

            Ok(Column {
                id: conn.last_insert_rowid(),
                board_id,
                name: name.to_string(),
                position,
                wip_limit,
            })
        })
    }

    /// Get a column by id.
    pub fn get_column(&self, column_id: i64) -> EngineResult<Column> {
        self.with_conn(|conn| get_column_internal(conn, column_id))
    }

    /// List a board's columns in ordinal order.
    pub fn list_columns(&self, board_id: i64) -> EngineResult<Vec<Column>> {
        self.with_conn(|conn| list_columns_internal(conn, board_id))
    }
}
