//! Task CRUD, identifier allocation, and batch goal creation.

use super::history::{HistoryKind, record_history};
use super::{Database, columns, deps, goals, now_ms, positions, wip};
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeEvent, ChangeEventKind};
use crate::metrics::{self, Measurement};
use crate::types::{
    ChildInput, DependencyRef, KeyFile, Priority, Task, TaskInput, TaskStatus, TaskType,
};
use rusqlite::{Connection, Row, params};

pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let task_type: String = row.get("task_type")?;
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let dependencies_json: String = row.get("dependencies")?;
    let capabilities_json: String = row.get("required_capabilities")?;
    let key_files_json: String = row.get("key_files")?;
    let needs_review: i64 = row.get("needs_review")?;

    Ok(Task {
        id: row.get("id")?,
        board_id: row.get("board_id")?,
        column_id: row.get("column_id")?,
        identifier: row.get("identifier")?,
        task_type: TaskType::parse(&task_type).unwrap_or(TaskType::Work),
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Open),
        priority: Priority::parse(&priority).unwrap_or(Priority::Medium),
        position: row.get("position")?,
        parent_id: row.get("parent_id")?,
        dependencies: serde_json::from_str(&dependencies_json).unwrap_or_default(),
        required_capabilities: serde_json::from_str(&capabilities_json).unwrap_or_default(),
        key_files: serde_json::from_str(&key_files_json).unwrap_or_default(),
        needs_review: needs_review != 0,
        assigned_to: row.get("assigned_to")?,
        claimed_at: row.get("claimed_at")?,
        claim_expires_at: row.get("claim_expires_at")?,
        completion_note: row.get("completion_note")?,
        reviewed_by: row.get("reviewed_by")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Internal helper to get a task using an existing connection.
pub(crate) fn get_task_internal(conn: &Connection, task_id: i64) -> EngineResult<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
    match stmt.query_row(params![task_id], parse_task_row) {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn get_task_by_identifier_internal(
    conn: &Connection,
    board_id: i64,
    identifier: &str,
) -> EngineResult<Option<Task>> {
    let mut stmt =
        conn.prepare("SELECT * FROM tasks WHERE board_id = ?1 AND identifier = ?2")?;
    match stmt.query_row(params![board_id, identifier], parse_task_row) {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Allocate the next display code for `(board, type)`.
///
/// The counter row is bumped in the creating transaction with a single
/// upsert, so concurrent creators serialize on the row and values are never
/// duplicated or reused. `UNIQUE(board_id, identifier)` backs this up.
pub(crate) fn allocate_identifier(
    conn: &Connection,
    board_id: i64,
    task_type: TaskType,
) -> EngineResult<String> {
    let value: i64 = conn.query_row(
        "INSERT INTO identifier_counters (board_id, task_type, last_value)
         VALUES (?1, ?2, 1)
         ON CONFLICT (board_id, task_type)
         DO UPDATE SET last_value = last_value + 1
         RETURNING last_value",
        params![board_id, task_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(format!("{}{}", task_type.identifier_prefix(), value))
}

fn next_column_position(conn: &Connection, column_id: i64) -> EngineResult<i64> {
    let position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM tasks WHERE column_id = ?1",
        params![column_id],
        |row| row.get(0),
    )?;
    Ok(position)
}

/// Insert one task row at the end of its column. Shared by single and batch
/// creation; admission control and dependency validation happen first at the
/// call sites.
#[allow(clippy::too_many_arguments)]
fn insert_task_row(
    conn: &Connection,
    board_id: i64,
    column_id: i64,
    identifier: &str,
    task_type: TaskType,
    title: &str,
    description: Option<&str>,
    priority: Priority,
    status: TaskStatus,
    parent_id: Option<i64>,
    dependencies: &[String],
    required_capabilities: &[String],
    key_files: &[KeyFile],
    needs_review: bool,
) -> EngineResult<i64> {
    let now = now_ms();
    let position = next_column_position(conn, column_id)?;
    conn.execute(
        "INSERT INTO tasks (
            board_id, column_id, identifier, task_type, title, description,
            status, priority, position, parent_id,
            dependencies, required_capabilities, key_files, needs_review,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
        params![
            board_id,
            column_id,
            identifier,
            task_type.as_str(),
            title,
            description,
            status.as_str(),
            priority.as_str(),
            position,
            parent_id,
            serde_json::to_string(dependencies)?,
            serde_json::to_string(required_capabilities)?,
            serde_json::to_string(key_files)?,
            needs_review as i64,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn check_parent(conn: &Connection, parent_id: i64, board_id: i64) -> EngineResult<()> {
    let parent = get_task_internal(conn, parent_id)?
        .ok_or_else(|| EngineError::task_not_found(parent_id))?;
    if parent.task_type != TaskType::Goal {
        return Err(EngineError::invalid_value(
            "parent_id",
            "Parent task must be a goal",
        ));
    }
    if parent.board_id != board_id {
        return Err(EngineError::invalid_value(
            "parent_id",
            "Parent goal is on another board",
        ));
    }
    Ok(())
}

fn validate_title(title: &str) -> EngineResult<()> {
    if title.trim().is_empty() {
        return Err(EngineError::invalid_value("title", "Title must not be empty"));
    }
    Ok(())
}

impl Database {
    /// Create a single task at the end of a column.
    ///
    /// The status is derived from the dependency list: open when every
    /// listed dependency is already completed, blocked otherwise.
    pub fn create_task(
        &self,
        column_id: i64,
        task_type: TaskType,
        input: TaskInput,
        parent_id: Option<i64>,
        actor: Option<&str>,
    ) -> EngineResult<Task> {
        self.in_transaction(|tx, events| {
            validate_title(&input.title)?;
            let column = columns::get_column_internal(tx, column_id)?;

            // Goals are containers: never nested, never dependent.
            if task_type == TaskType::Goal {
                if parent_id.is_some() {
                    return Err(EngineError::invalid_value(
                        "parent_id",
                        "A goal cannot contain another goal",
                    ));
                }
                if !input.dependencies.is_empty() {
                    return Err(EngineError::invalid_value(
                        "dependencies",
                        "Goals cannot declare dependencies",
                    ));
                }
            }

            if let Some(pid) = parent_id {
                check_parent(tx, pid, column.board_id)?;
            }

            wip::check_admission(tx, &column, task_type)?;

            let identifier = allocate_identifier(tx, column.board_id, task_type)?;
            deps::validate_dependencies(tx, column.board_id, &identifier, &input.dependencies)?;

            let status = if input.dependencies.is_empty() {
                TaskStatus::Open
            } else {
                deps::derive_status(tx, column.board_id, &input.dependencies)?
            };

            let task_id = insert_task_row(
                tx,
                column.board_id,
                column.id,
                &identifier,
                task_type,
                &input.title,
                input.description.as_deref(),
                input.priority.unwrap_or(Priority::Medium),
                status,
                parent_id,
                &input.dependencies,
                &input.required_capabilities,
                &input.key_files,
                input.needs_review,
            )?;

            let task = get_task_internal(tx, task_id)?
                .ok_or_else(|| EngineError::task_not_found(task_id))?;
            record_history(tx, &task, HistoryKind::Created, None, Some(&column.name), actor)?;
            metrics::record(Measurement::Created, &task, actor);
            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskCreated,
                board_id: task.board_id,
                task: task.clone(),
            });

            if let Some(pid) = parent_id {
                goals::resync_goal_in_tx(tx, events, pid, actor)?;
            }

            Ok(task)
        })
    }

    /// Create a goal and its children as one atomic batch.
    ///
    /// Identifiers for the whole batch are pre-allocated in memory, which is
    /// what lets a child's dependency entry reference a sibling by zero-based
    /// creation index before that sibling exists. Any invalid child aborts
    /// the batch; the burned identifier values are simply never issued again.
    pub fn create_goal_with_children(
        &self,
        column_id: i64,
        goal_input: TaskInput,
        children: Vec<ChildInput>,
        actor: Option<&str>,
    ) -> EngineResult<(Task, Vec<Task>)> {
        self.in_transaction(|tx, events| {
            validate_title(&goal_input.title)?;
            let column = columns::get_column_internal(tx, column_id)?;
            let board_id = column.board_id;

            let goal_identifier = allocate_identifier(tx, board_id, TaskType::Goal)?;
            let mut child_identifiers = Vec::with_capacity(children.len());
            for child in &children {
                validate_title(&child.title)?;
                if child.task_type == TaskType::Goal {
                    return Err(EngineError::invalid_value(
                        "task_type",
                        "A goal cannot contain another goal",
                    ));
                }
                child_identifiers.push(allocate_identifier(tx, board_id, child.task_type)?);
            }

            // Resolve index references against the pre-allocated identifiers
            // and literal references against persisted tasks.
            let mut resolved: Vec<Vec<String>> = Vec::with_capacity(children.len());
            for (index, child) in children.iter().enumerate() {
                let mut list = Vec::with_capacity(child.dependencies.len());
                for dep in &child.dependencies {
                    match dep {
                        DependencyRef::Index(i) => {
                            if *i == index {
                                return Err(EngineError::self_dependency(
                                    &child_identifiers[index],
                                ));
                            }
                            let ident = child_identifiers.get(*i).ok_or_else(|| {
                                EngineError::invalid_value(
                                    "dependencies",
                                    &format!("Dependency index {} is out of range", i),
                                )
                            })?;
                            list.push(ident.clone());
                        }
                        DependencyRef::Identifier(ident) => {
                            let known_sibling = child_identifiers.iter().any(|c| c == ident);
                            let persisted =
                                get_task_by_identifier_internal(tx, board_id, ident)?.is_some();
                            if !known_sibling && !persisted {
                                return Err(EngineError::invalid_value(
                                    "dependencies",
                                    &format!("Unknown dependency identifier: {}", ident),
                                ));
                            }
                            list.push(ident.clone());
                        }
                    }
                }
                resolved.push(list);
            }

            let goal_id = insert_task_row(
                tx,
                board_id,
                column.id,
                &goal_identifier,
                TaskType::Goal,
                &goal_input.title,
                goal_input.description.as_deref(),
                goal_input.priority.unwrap_or(Priority::Medium),
                TaskStatus::Open,
                None,
                &[],
                &[],
                &[],
                false,
            )?;
            let goal = get_task_internal(tx, goal_id)?
                .ok_or_else(|| EngineError::task_not_found(goal_id))?;
            record_history(tx, &goal, HistoryKind::Created, None, Some(&column.name), actor)?;
            metrics::record(Measurement::Created, &goal, actor);

            let mut created = Vec::with_capacity(children.len());
            for (index, child) in children.iter().enumerate() {
                wip::check_admission(tx, &column, child.task_type)?;
                let child_id = insert_task_row(
                    tx,
                    board_id,
                    column.id,
                    &child_identifiers[index],
                    child.task_type,
                    &child.title,
                    child.description.as_deref(),
                    child.priority.unwrap_or(Priority::Medium),
                    TaskStatus::Open,
                    Some(goal_id),
                    &resolved[index],
                    &child.required_capabilities,
                    &child.key_files,
                    child.needs_review,
                )?;
                let task = get_task_internal(tx, child_id)?
                    .ok_or_else(|| EngineError::task_not_found(child_id))?;
                record_history(tx, &task, HistoryKind::Created, None, Some(&column.name), actor)?;
                metrics::record(Measurement::Created, &task, actor);
                created.push(task);
            }

            // All rows exist now, so sibling cycles are visible to the
            // traversal and statuses can be derived.
            for task in &mut created {
                if task.dependencies.is_empty() {
                    continue;
                }
                deps::validate_dependencies(
                    tx,
                    board_id,
                    &task.identifier,
                    &task.dependencies,
                )?;
                let status = deps::derive_status(tx, board_id, &task.dependencies)?;
                if status != task.status {
                    tx.execute(
                        "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                        params![status.as_str(), now_ms(), task.id],
                    )?;
                    task.status = status;
                }
            }

            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskCreated,
                board_id,
                task: goal.clone(),
            });
            for task in &created {
                events.push(ChangeEvent {
                    kind: ChangeEventKind::TaskCreated,
                    board_id,
                    task: task.clone(),
                });
            }

            Ok((goal, created))
        })
    }

    /// Update task fields. Column and position changes go through
    /// [`Database::move_task`] instead.
    ///
    /// A changed dependency list is re-validated for cycles and the task's
    /// blocked/open status is re-derived (completed tasks are never
    /// altered).
    #[allow(clippy::too_many_arguments)]
    pub fn update_task(
        &self,
        task_id: i64,
        title: Option<String>,
        description: Option<Option<String>>,
        priority: Option<Priority>,
        needs_review: Option<bool>,
        dependencies: Option<Vec<String>>,
        required_capabilities: Option<Vec<String>>,
        key_files: Option<Vec<KeyFile>>,
        actor: Option<&str>,
    ) -> EngineResult<Task> {
        self.in_transaction(|tx, events| {
            let task = get_task_internal(tx, task_id)?
                .ok_or_else(|| EngineError::task_not_found(task_id))?;
            let now = now_ms();

            let new_title = title.unwrap_or_else(|| task.title.clone());
            validate_title(&new_title)?;
            let new_description = description.unwrap_or_else(|| task.description.clone());
            let new_priority = priority.unwrap_or(task.priority);
            let new_needs_review = needs_review.unwrap_or(task.needs_review);
            let new_capabilities =
                required_capabilities.unwrap_or_else(|| task.required_capabilities.clone());
            let new_key_files = key_files.unwrap_or_else(|| task.key_files.clone());

            let deps_changed = dependencies
                .as_ref()
                .is_some_and(|d| *d != task.dependencies);
            let new_dependencies = dependencies.unwrap_or_else(|| task.dependencies.clone());

            let mut new_status = task.status;
            if deps_changed {
                deps::validate_dependencies(
                    tx,
                    task.board_id,
                    &task.identifier,
                    &new_dependencies,
                )?;
                if task.status != TaskStatus::Completed {
                    let derived = deps::derive_status(tx, task.board_id, &new_dependencies)?;
                    new_status = match derived {
                        TaskStatus::Blocked => TaskStatus::Blocked,
                        // An unblocked in-progress task stays in progress.
                        _ if task.status == TaskStatus::Blocked => TaskStatus::Open,
                        _ => task.status,
                    };
                }
            }

            if new_priority != task.priority {
                record_history(
                    tx,
                    &task,
                    HistoryKind::PriorityChanged,
                    Some(task.priority.as_str()),
                    Some(new_priority.as_str()),
                    actor,
                )?;
            }

            tx.execute(
                "UPDATE tasks SET
                    title = ?1, description = ?2, priority = ?3, needs_review = ?4,
                    dependencies = ?5, required_capabilities = ?6, key_files = ?7,
                    status = ?8, updated_at = ?9
                 WHERE id = ?10",
                params![
                    new_title,
                    new_description,
                    new_priority.as_str(),
                    new_needs_review as i64,
                    serde_json::to_string(&new_dependencies)?,
                    serde_json::to_string(&new_capabilities)?,
                    serde_json::to_string(&new_key_files)?,
                    new_status.as_str(),
                    now,
                    task.id,
                ],
            )?;

            let updated = get_task_internal(tx, task.id)?
                .ok_or_else(|| EngineError::task_not_found(task.id))?;
            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskUpdated,
                board_id: updated.board_id,
                task: updated.clone(),
            });
            Ok(updated)
        })
    }

    /// Delete a task.
    ///
    /// Rejected while other tasks depend on it. The remainder of its column
    /// renumbers to stay dense, and a parent goal that just lost its last
    /// child is deleted with it; otherwise the goal resynchronizes.
    pub fn delete_task(&self, task_id: i64, actor: Option<&str>) -> EngineResult<()> {
        self.in_transaction(|tx, events| {
            let task = get_task_internal(tx, task_id)?
                .ok_or_else(|| EngineError::task_not_found(task_id))?;

            let dependents = deps::dependents_of(tx, task.board_id, &task.identifier)?;
            if !dependents.is_empty() {
                return Err(EngineError::dependents_exist(&task.identifier, &dependents));
            }
            if task.task_type == TaskType::Goal
                && !goals::children_of(tx, task.id)?.is_empty()
            {
                return Err(EngineError::invalid_value(
                    "task_id",
                    "Goal still has children; delete or reparent them first",
                ));
            }

            tx.execute("DELETE FROM tasks WHERE id = ?1", params![task.id])?;
            positions::close_gap(tx, task.column_id, task.position)?;
            events.push(ChangeEvent {
                kind: ChangeEventKind::TaskDeleted,
                board_id: task.board_id,
                task: task.clone(),
            });

            if let Some(parent_id) = task.parent_id {
                if goals::delete_goal_if_childless(tx, events, parent_id)?.is_none() {
                    goals::resync_goal_in_tx(tx, events, parent_id, actor)?;
                }
            }

            Ok(())
        })
    }

    /// Get a task by row id.
    pub fn get_task(&self, task_id: i64) -> EngineResult<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Get a task by its board-scoped display code.
    pub fn get_task_by_identifier(
        &self,
        board_id: i64,
        identifier: &str,
    ) -> EngineResult<Option<Task>> {
        self.with_conn(|conn| get_task_by_identifier_internal(conn, board_id, identifier))
    }

    /// Tasks in a column, in position order.
    pub fn list_column_tasks(&self, column_id: i64) -> EngineResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM tasks WHERE column_id = ?1 ORDER BY position")?;
            let tasks = stmt
                .query_map(params![column_id], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// All tasks on a board, grouped by column then position.
    pub fn list_board_tasks(&self, board_id: i64) -> EngineResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE board_id = ?1 ORDER BY column_id, position",
            )?;
            let tasks = stmt
                .query_map(params![board_id], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Direct children of a goal.
    pub fn get_children(&self, goal_id: i64) -> EngineResult<Vec<Task>> {
        self.with_conn(|conn| goals::children_of(conn, goal_id))
    }
}
