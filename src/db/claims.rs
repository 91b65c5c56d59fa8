//! Claim arbiter: selection, atomic acquisition, and the review handoff.
//!
//! At most one active claim exists per task. The guarantee does not come
//! from locks: acquisition is a single conditional UPDATE whose predicate
//! re-checks claimability at write time, so of two concurrent claimants one
//! matches zero rows and observes "no task available". Expiry is lazy — a
//! stale claim is only noticed (and taken over) at the next claim attempt.

use super::history::{HistoryKind, record_history};
use super::{Database, columns, deps, goals, now_ms, positions, tasks};
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::events::{ChangeEvent, ChangeEventKind};
use crate::metrics::{self, Measurement};
use crate::types::{ClaimedTask, Column, ColumnRole, ReviewVerdict, Task, TaskStatus};
use rusqlite::{Connection, Transaction, params};
use std::collections::HashSet;

/// Key-file paths of tasks actively being worked (in_progress, sitting in
/// Doing or Review) anywhere on the board. Used as a coarse conflict guard.
fn active_key_file_paths(conn: &Connection, board_id: i64) -> EngineResult<HashSet<String>> {
    let active_columns: Vec<i64> = columns::list_columns_internal(conn, board_id)?
        .into_iter()
        .filter(|c| matches!(c.role(), ColumnRole::Doing | ColumnRole::Review))
        .map(|c| c.id)
        .collect();

    let mut paths = HashSet::new();
    if active_columns.is_empty() {
        return Ok(paths);
    }

    let placeholders: Vec<String> = active_columns.iter().map(|_| "?".to_string()).collect();
    let sql = format!(
        "SELECT key_files FROM tasks
         WHERE board_id = ? AND status = 'in_progress' AND column_id IN ({})",
        placeholders.join(", ")
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(board_id)];
    for id in &active_columns {
        params_vec.push(Box::new(*id));
    }
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let key_files_json: Vec<String> = stmt
        .query_map(params_refs.as_slice(), |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    for json in key_files_json {
        let files: Vec<crate::types::KeyFile> = serde_json::from_str(&json)?;
        for file in files {
            paths.insert(file.path);
        }
    }
    Ok(paths)
}

/// Whether `task` passes every claim filter for an actor with
/// `capabilities`. The claimability predicate (open, or in_progress with an
/// expired claim) is re-checked by the acquisition UPDATE; this is the
/// selection-time screen.
fn passes_claim_filters(
    conn: &Connection,
    task: &Task,
    capabilities: &[String],
    active_paths: &HashSet<String>,
    now: i64,
) -> EngineResult<bool> {
    if !task.task_type.is_claimable() {
        return Ok(false);
    }

    let claimable = match task.status {
        TaskStatus::Open => true,
        TaskStatus::InProgress => !task.has_active_claim(now),
        _ => false,
    };
    if !claimable {
        return Ok(false);
    }

    // Capability match is superset (AND) semantics: the actor must hold
    // every required capability.
    if !task
        .required_capabilities
        .iter()
        .all(|cap| capabilities.iter().any(|have| have == cap))
    {
        return Ok(false);
    }

    if !deps::all_dependencies_completed(conn, task.board_id, &task.dependencies)? {
        return Ok(false);
    }

    if task
        .key_files
        .iter()
        .any(|file| active_paths.contains(&file.path))
    {
        return Ok(false);
    }

    Ok(true)
}

/// Candidate tasks in the Ready column, priority rank then position.
fn ranked_candidates(conn: &Connection, ready_column_id: i64, now: i64) -> EngineResult<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM tasks
         WHERE column_id = ?1 AND task_type IN ('work', 'defect')
         AND (status = 'open'
              OR (status = 'in_progress' AND claim_expires_at IS NOT NULL
                  AND claim_expires_at <= ?2))
         ORDER BY
             CASE priority
                 WHEN 'critical' THEN 0
                 WHEN 'high' THEN 1
                 WHEN 'medium' THEN 2
                 ELSE 3
             END,
             position",
    )?;
    let candidates = stmt
        .query_map(params![ready_column_id, now], tasks::parse_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(candidates)
}

/// Write the claim. The predicate repeats the claimability check so a
/// concurrent winner makes this match zero rows instead of double-claiming.
fn acquire(
    conn: &Connection,
    task_id: i64,
    actor: &str,
    now: i64,
    ttl_seconds: i64,
) -> EngineResult<bool> {
    let expires = now + ttl_seconds * 1000;
    let updated = conn.execute(
        "UPDATE tasks SET
            status = 'in_progress', assigned_to = ?1,
            claimed_at = ?2, claim_expires_at = ?3, updated_at = ?2
         WHERE id = ?4
         AND (status = 'open'
              OR (status = 'in_progress' AND claim_expires_at IS NOT NULL
                  AND claim_expires_at <= ?2))",
        params![actor, now, expires, task_id],
    )?;
    Ok(updated == 1)
}

fn find_role_column(
    conn: &Connection,
    board_id: i64,
    role: ColumnRole,
    what: &str,
) -> EngineResult<Column> {
    columns::find_column_by_role(conn, board_id, role)?.ok_or_else(|| {
        EngineError::new(
            ErrorCode::ColumnNotFound,
            format!("Board has no {} column", what),
        )
    })
}

/// Move a completing task into Done. Relocation applies the Done status
/// policy, runs the unblock scan, and clears the claim timestamps.
fn finish_into_done(
    tx: &Transaction,
    events: &mut Vec<ChangeEvent>,
    task: &Task,
    actor: &str,
) -> EngineResult<Task> {
    let done = find_role_column(tx, task.board_id, ColumnRole::Done, "Done")?;
    let completed = positions::relocate_in_tx(tx, events, task, &done, None, Some(actor))?;
    events.push(ChangeEvent {
        kind: ChangeEventKind::TaskCompleted,
        board_id: completed.board_id,
        task: completed.clone(),
    });
    Ok(completed)
}

impl Database {
    /// Select and atomically claim the next task for an actor.
    ///
    /// With `identifier` set, ranking is skipped and the same filters are
    /// applied to that single task. Callers receive `NoTaskAvailable` both
    /// when nothing passes the filters and when a concurrent claimant won the
    /// race; they do not auto-retry.
    pub fn claim_next(
        &self,
        actor: &str,
        capabilities: &[String],
        board_id: i64,
        identifier: Option<&str>,
    ) -> EngineResult<ClaimedTask> {
        let ttl = self.config().claim_ttl_seconds;

        self.in_transaction(|tx, events| {
            let now = now_ms();
            let ready = find_role_column(tx, board_id, ColumnRole::Ready, "Ready")?;
            let active_paths = active_key_file_paths(tx, board_id)?;

            let selected: Option<Task> = if let Some(ident) = identifier {
                let task = tasks::get_task_by_identifier_internal(tx, board_id, ident)?
                    .ok_or_else(|| EngineError::task_not_found(ident))?;
                if task.column_id == ready.id
                    && passes_claim_filters(tx, &task, capabilities, &active_paths, now)?
                {
                    Some(task)
                } else {
                    None
                }
            } else {
                let mut picked = None;
                for candidate in ranked_candidates(tx, ready.id, now)? {
                    if passes_claim_filters(tx, &candidate, capabilities, &active_paths, now)? {
                        picked = Some(candidate);
                        break;
                    }
                }
                picked
            };

            let Some(task) = selected else {
                return Err(EngineError::no_task_available());
            };

            if !acquire(tx, task.id, actor, now, ttl)? {
                // Lost the race: a concurrent claimant got there first.
                return Err(EngineError::no_task_available());
            }

            record_history(
                tx,
                &task,
                HistoryKind::AssignmentChanged,
                task.assigned_to.as_deref(),
                Some(actor),
                Some(actor),
            )?;

            let claimed = tasks::get_task_internal(tx, task.id)?
                .ok_or_else(|| EngineError::task_not_found(task.id))?;
            let doing = find_role_column(tx, board_id, ColumnRole::Doing, "Doing")?;
            let relocated =
                positions::relocate_in_tx(tx, events, &claimed, &doing, None, Some(actor))?;

            if let Some(parent_id) = relocated.parent_id {
                goals::resync_goal_in_tx(tx, events, parent_id, Some(actor))?;
            }

            metrics::record(Measurement::Claimed, &relocated, Some(actor));
            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskClaimed,
                board_id,
                task: relocated.clone(),
            });

            let dependencies = relocated.dependencies.clone();
            let key_file_paths = relocated
                .key_files
                .iter()
                .map(|f| f.path.clone())
                .collect();

            Ok(ClaimedTask {
                task: relocated,
                dependencies,
                key_file_paths,
            })
        })
    }

    /// Release a claim without completing the task. Only the current
    /// assignee may unclaim, and only while the task is in progress. The
    /// task returns to Ready, open, at the end of the column.
    pub fn unclaim_task(&self, task_id: i64, actor: &str) -> EngineResult<Task> {
        self.in_transaction(|tx, events| {
            let task = tasks::get_task_internal(tx, task_id)?
                .ok_or_else(|| EngineError::task_not_found(task_id))?;

            if task.status != TaskStatus::InProgress || task.claimed_at.is_none() {
                return Err(EngineError::invalid_value(
                    "status",
                    "Task is not currently claimed",
                ));
            }
            if task.assigned_to.as_deref() != Some(actor) {
                return Err(EngineError::not_assignee(&task.identifier, actor));
            }

            conn_clear_claim(tx, task.id)?;
            record_history(
                tx,
                &task,
                HistoryKind::AssignmentChanged,
                Some(actor),
                None,
                Some(actor),
            )?;

            let ready = find_role_column(tx, task.board_id, ColumnRole::Ready, "Ready")?;
            let cleared = tasks::get_task_internal(tx, task.id)?
                .ok_or_else(|| EngineError::task_not_found(task.id))?;
            let moved = positions::relocate_in_tx(tx, events, &cleared, &ready, None, Some(actor))?;

            if let Some(parent_id) = moved.parent_id {
                goals::resync_goal_in_tx(tx, events, parent_id, Some(actor))?;
            }

            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskUpdated,
                board_id: moved.board_id,
                task: moved.clone(),
            });
            Ok(moved)
        })
    }

    /// Hand a claimed task off for review.
    ///
    /// Moves it to Review (still in_progress) and records the completion
    /// note. If the task does not need review, the same transaction
    /// continues straight into Done: status completed, unblock scan, claim
    /// cleared.
    pub fn submit_for_review(
        &self,
        task_id: i64,
        actor: &str,
        completion_note: Option<&str>,
    ) -> EngineResult<Task> {
        self.in_transaction(|tx, events| {
            let task = tasks::get_task_internal(tx, task_id)?
                .ok_or_else(|| EngineError::task_not_found(task_id))?;

            if task.status != TaskStatus::InProgress {
                return Err(EngineError::invalid_value(
                    "status",
                    "Only in-progress tasks can be submitted for review",
                ));
            }
            if task.assigned_to.as_deref() != Some(actor) {
                return Err(EngineError::not_assignee(&task.identifier, actor));
            }

            tx.execute(
                "UPDATE tasks SET completion_note = ?1, updated_at = ?2 WHERE id = ?3",
                params![completion_note, now_ms(), task.id],
            )?;

            let review = find_role_column(tx, task.board_id, ColumnRole::Review, "Review")?;
            let current = tasks::get_task_internal(tx, task.id)?
                .ok_or_else(|| EngineError::task_not_found(task.id))?;
            let mut moved =
                positions::relocate_in_tx(tx, events, &current, &review, None, Some(actor))?;
            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskMoved,
                board_id: moved.board_id,
                task: moved.clone(),
            });

            if !moved.needs_review {
                moved = finish_into_done(tx, events, &moved, actor)?;
            }

            if let Some(parent_id) = moved.parent_id {
                goals::resync_goal_in_tx(tx, events, parent_id, Some(actor))?;
            }

            Ok(moved)
        })
    }

    /// Deliver a review verdict on a task sitting in Review.
    ///
    /// Approve moves it to Done (completed, unblock scan); request-changes
    /// returns it to Doing, still in progress and still claimed.
    pub fn review_task(
        &self,
        task_id: i64,
        reviewer: &str,
        verdict: ReviewVerdict,
    ) -> EngineResult<Task> {
        self.in_transaction(|tx, events| {
            let task = tasks::get_task_internal(tx, task_id)?
                .ok_or_else(|| EngineError::task_not_found(task_id))?;
            let column = columns::get_column_internal(tx, task.column_id)?;

            if column.role() != ColumnRole::Review || task.status != TaskStatus::InProgress {
                return Err(EngineError::invalid_value(
                    "status",
                    "Task is not awaiting review",
                ));
            }

            tx.execute(
                "UPDATE tasks SET reviewed_by = ?1, updated_at = ?2 WHERE id = ?3",
                params![reviewer, now_ms(), task.id],
            )?;
            let current = tasks::get_task_internal(tx, task.id)?
                .ok_or_else(|| EngineError::task_not_found(task.id))?;

            let moved = match verdict {
                ReviewVerdict::Approve => finish_into_done(tx, events, &current, reviewer)?,
                ReviewVerdict::RequestChanges => {
                    let doing =
                        find_role_column(tx, task.board_id, ColumnRole::Doing, "Doing")?;
                    positions::relocate_in_tx(tx, events, &current, &doing, None, Some(reviewer))?
                }
            };

            if let Some(parent_id) = moved.parent_id {
                goals::resync_goal_in_tx(tx, events, parent_id, Some(reviewer))?;
            }

            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskReviewed,
                board_id: moved.board_id,
                task: moved.clone(),
            });
            Ok(moved)
        })
    }
}

fn conn_clear_claim(conn: &Connection, task_id: i64) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET assigned_to = NULL, claimed_at = NULL, claim_expires_at = NULL,
            status = 'open', updated_at = ?1
         WHERE id = ?2",
        params![now_ms(), task_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::types::TaskInput;

    fn setup() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let board = db.create_board("alpha").unwrap();
        let ready = db.create_column(board.id, "Ready", None).unwrap().id;
        db.create_column(board.id, "Doing", None).unwrap();
        (db, board.id, ready)
    }

    /// Rewrite a claimed task as an in_progress row sitting in Ready with the
    /// given expiry, the shape an externally restored stale claim takes.
    fn strand_in_ready(db: &Database, task_id: i64, ready: i64, expires_at: i64) {
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET column_id = ?1, position = 0, status = 'in_progress',
                    claim_expires_at = ?2
                 WHERE id = ?3",
                params![ready, expires_at, task_id],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn claimed_task(db: &Database, board: i64, ready: i64) -> Task {
        db.create_task(
            ready,
            crate::types::TaskType::Work,
            TaskInput {
                title: "stale".to_string(),
                ..Default::default()
            },
            None,
            None,
        )
        .unwrap();
        db.claim_next("agent-a", &[], board, None).unwrap().task
    }

    #[test]
    fn expired_claim_in_ready_is_taken_over() {
        let (db, board, ready) = setup();
        let task = claimed_task(&db, board, ready);
        strand_in_ready(&db, task.id, ready, now_ms() - 1);

        let reclaimed = db.claim_next("agent-b", &[], board, None).unwrap().task;
        assert_eq!(reclaimed.id, task.id);
        assert_eq!(reclaimed.assigned_to.as_deref(), Some("agent-b"));
        assert!(reclaimed.claim_expires_at.unwrap() > now_ms() - 1000);
    }

    #[test]
    fn live_claim_in_ready_is_not_taken_over() {
        let (db, board, ready) = setup();
        let task = claimed_task(&db, board, ready);
        strand_in_ready(&db, task.id, ready, now_ms() + 3_600_000);

        let err = db.claim_next("agent-b", &[], board, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoTaskAvailable);
        let untouched = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(untouched.assigned_to.as_deref(), Some("agent-a"));
    }
}
