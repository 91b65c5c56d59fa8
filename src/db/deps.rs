//! Dependency graph: cycle validation, blocked/open derivation, and unblock
//! propagation.
//!
//! Dependencies are stored as ordered lists of identifier strings on each
//! task row. They are soft references: a listed identifier may not exist yet
//! (forward references inside a creation batch), and a missing referent
//! counts as incomplete.

use super::Database;
use super::now_ms;
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeEvent, ChangeEventKind};
use crate::metrics::{self, Measurement};
use crate::types::{Task, TaskStatus};
use rusqlite::{Connection, params};
use std::collections::{HashMap, HashSet};

/// Fetch `(status, dependencies)` for a set of identifiers in one query.
fn fetch_dependency_rows(
    conn: &Connection,
    board_id: i64,
    identifiers: &[String],
) -> EngineResult<HashMap<String, (TaskStatus, Vec<String>)>> {
    if identifiers.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = identifiers.iter().map(|_| "?".to_string()).collect();
    let sql = format!(
        "SELECT identifier, status, dependencies FROM tasks
         WHERE board_id = ? AND identifier IN ({})",
        placeholders.join(", ")
    );

    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    params_vec.push(Box::new(board_id));
    for ident in identifiers {
        params_vec.push(Box::new(ident.clone()));
    }
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_refs.as_slice(), |row| {
            let identifier: String = row.get(0)?;
            let status: String = row.get(1)?;
            let deps_json: String = row.get(2)?;
            Ok((identifier, status, deps_json))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut map = HashMap::new();
    for (identifier, status, deps_json) in rows {
        let status = TaskStatus::parse(&status)
            .ok_or_else(|| EngineError::internal(format!("bad status in row: {}", status)))?;
        let deps: Vec<String> = serde_json::from_str(&deps_json)?;
        map.insert(identifier, (status, deps));
    }
    Ok(map)
}

/// Validate a prospective dependency list for `identifier`.
///
/// Rejects self-references and any list through which `identifier` is
/// reachable from one of its own dependencies. The cycle check is an
/// iterative traversal with an explicit visited set; each frontier's
/// dependency lists are fetched in one batched read, so the query count is
/// bounded by graph depth rather than edge count.
pub(crate) fn validate_dependencies(
    conn: &Connection,
    board_id: i64,
    identifier: &str,
    dependencies: &[String],
) -> EngineResult<()> {
    for dep in dependencies {
        if dep == identifier {
            return Err(EngineError::self_dependency(identifier));
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = dependencies
        .iter()
        .filter(|d| visited.insert((*d).clone()))
        .cloned()
        .collect();

    while !frontier.is_empty() {
        let rows = fetch_dependency_rows(conn, board_id, &frontier)?;
        let mut next: Vec<String> = Vec::new();

        for ident in &frontier {
            // Unpersisted forward references have no stored list to follow.
            let Some((_, deps)) = rows.get(ident) else {
                continue;
            };
            for dep in deps {
                if dep == identifier {
                    return Err(EngineError::dependency_cycle(identifier, ident));
                }
                if visited.insert(dep.clone()) {
                    next.push(dep.clone());
                }
            }
        }

        frontier = next;
    }

    Ok(())
}

/// Whether every identifier in `dependencies` names a task on `board_id`
/// whose status is completed. Missing referents count as incomplete.
pub(crate) fn all_dependencies_completed(
    conn: &Connection,
    board_id: i64,
    dependencies: &[String],
) -> EngineResult<bool> {
    if dependencies.is_empty() {
        return Ok(true);
    }
    let rows = fetch_dependency_rows(conn, board_id, dependencies)?;
    Ok(dependencies.iter().all(|dep| {
        matches!(rows.get(dep), Some((TaskStatus::Completed, _)))
    }))
}

/// Derive open/blocked for a dependency list. Tasks already completed are
/// never re-derived; callers check that first.
pub(crate) fn derive_status(
    conn: &Connection,
    board_id: i64,
    dependencies: &[String],
) -> EngineResult<TaskStatus> {
    if all_dependencies_completed(conn, board_id, dependencies)? {
        Ok(TaskStatus::Open)
    } else {
        Ok(TaskStatus::Blocked)
    }
}

/// Propagate the completion of `completed_identifier` to its blocked
/// dependents on the same board.
///
/// Runs inside the completing transaction, so no reader can observe a
/// completed dependency paired with a stale blocked dependent.
pub(crate) fn unblock_dependents(
    conn: &Connection,
    events: &mut Vec<ChangeEvent>,
    completed_identifier: &str,
    board_id: i64,
    actor: Option<&str>,
) -> EngineResult<()> {
    let now = now_ms();

    let mut stmt = conn.prepare(
        "SELECT id, dependencies FROM tasks
         WHERE board_id = ?1 AND status = 'blocked'",
    )?;
    let blocked: Vec<(i64, String)> = stmt
        .query_map(params![board_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (task_id, deps_json) in blocked {
        let deps: Vec<String> = serde_json::from_str(&deps_json)?;
        if !deps.iter().any(|d| d == completed_identifier) {
            continue;
        }
        if !all_dependencies_completed(conn, board_id, &deps)? {
            continue;
        }

        conn.execute(
            "UPDATE tasks SET status = 'open', updated_at = ?1 WHERE id = ?2",
            params![now, task_id],
        )?;

        let task = super::tasks::get_task_internal(conn, task_id)?
            .ok_or_else(|| EngineError::task_not_found(task_id))?;
        metrics::record(Measurement::Unblocked, &task, actor);
        events.push(ChangeEvent {
            kind: ChangeEventKind::TaskUpdated,
            board_id,
            task,
        });
    }

    Ok(())
}

/// Identifiers of tasks on `board_id` whose dependency list names
/// `identifier`.
pub(crate) fn dependents_of(
    conn: &Connection,
    board_id: i64,
    identifier: &str,
) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT identifier, dependencies FROM tasks WHERE board_id = ?1",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map(params![board_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut dependents = Vec::new();
    for (ident, deps_json) in rows {
        let deps: Vec<String> = serde_json::from_str(&deps_json)?;
        if deps.iter().any(|d| d == identifier) {
            dependents.push(ident);
        }
    }
    Ok(dependents)
}

impl Database {
    /// Tasks on a board currently blocked by incomplete dependencies.
    pub fn get_blocked_tasks(&self, board_id: i64) -> EngineResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE board_id = ?1 AND status = 'blocked'
                 ORDER BY column_id, position",
            )?;
            let tasks = stmt
                .query_map(params![board_id], super::tasks::parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Identifiers of tasks depending on the given identifier.
    pub fn get_dependents(&self, board_id: i64, identifier: &str) -> EngineResult<Vec<String>> {
        self.with_conn(|conn| dependents_of(conn, board_id, identifier))
    }
}
