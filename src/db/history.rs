//! Structured mutation records for the history collaborator.
//!
//! Records are written inside the mutating transaction, so history is exactly
//! as atomic as the mutation it describes.

use super::Database;
use super::now_ms;
use crate::error::EngineResult;
use crate::types::Task;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

/// Kind of recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Created,
    Moved,
    PriorityChanged,
    AssignmentChanged,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Created => "created",
            HistoryKind::Moved => "moved",
            HistoryKind::PriorityChanged => "priority_changed",
            HistoryKind::AssignmentChanged => "assignment_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(HistoryKind::Created),
            "moved" => Some(HistoryKind::Moved),
            "priority_changed" => Some(HistoryKind::PriorityChanged),
            "assignment_changed" => Some(HistoryKind::AssignmentChanged),
            _ => None,
        }
    }
}

/// One history record. `from_value`/`to_value` hold column names for moves,
/// priority names for priority changes, and actor ids for assignment changes.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub task_id: i64,
    pub board_id: i64,
    pub kind: HistoryKind,
    pub from_value: Option<String>,
    pub to_value: Option<String>,
    pub actor: Option<String>,
    pub recorded_at: i64,
}

pub(crate) fn record_history(
    conn: &Connection,
    task: &Task,
    kind: HistoryKind,
    from_value: Option<&str>,
    to_value: Option<&str>,
    actor: Option<&str>,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO task_history (task_id, board_id, kind, from_value, to_value, actor, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            task.id,
            task.board_id,
            kind.as_str(),
            from_value,
            to_value,
            actor,
            now_ms(),
        ],
    )?;
    Ok(())
}

impl Database {
    /// History records for one task, oldest first.
    pub fn task_history(&self, task_id: i64) -> EngineResult<Vec<HistoryRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, board_id, kind, from_value, to_value, actor, recorded_at
                 FROM task_history WHERE task_id = ?1 ORDER BY id",
            )?;
            let records = stmt
                .query_map(params![task_id], |row| {
                    let kind: String = row.get("kind")?;
                    Ok(HistoryRecord {
                        id: row.get("id")?,
                        task_id: row.get("task_id")?,
                        board_id: row.get("board_id")?,
                        kind: HistoryKind::parse(&kind)
                            .unwrap_or(HistoryKind::Created),
                        from_value: row.get("from_value")?,
                        to_value: row.get("to_value")?,
                        actor: row.get("actor")?,
                        recorded_at: row.get("recorded_at")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }
}
