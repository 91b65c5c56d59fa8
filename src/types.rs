//! Core types for the kanban consistency engine.

use serde::{Deserialize, Serialize};

/// Task type. Goals are non-claimable container tasks whose board placement
/// tracks their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Work,
    Defect,
    Goal,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Work => "work",
            TaskType::Defect => "defect",
            TaskType::Goal => "goal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "work" => Some(TaskType::Work),
            "defect" => Some(TaskType::Defect),
            "goal" => Some(TaskType::Goal),
            _ => None,
        }
    }

    /// Identifier prefix for display codes (W12, D4, G2).
    pub fn identifier_prefix(&self) -> &'static str {
        match self {
            TaskType::Work => "W",
            TaskType::Defect => "D",
            TaskType::Goal => "G",
        }
    }

    /// Whether tasks of this type can be claimed by an actor.
    pub fn is_claimable(&self) -> bool {
        !matches!(self, TaskType::Goal)
    }

    /// Whether tasks of this type count against a column's WIP limit.
    pub fn counts_against_wip(&self) -> bool {
        !matches!(self, TaskType::Goal)
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TaskStatus::Open),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }
}

/// Task priority. Ordering is by urgency: critical ranks above high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Numeric rank used for claim ordering. Lower ranks first.
    pub fn rank(&self) -> i32 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

/// Role a column plays on its board, matched by display name rather than a
/// stored enum so boards can rename columns without a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Backlog,
    Ready,
    Doing,
    Review,
    Done,
    Other,
}

impl ColumnRole {
    /// Match a column name to its role. Unrecognized names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "backlog" => ColumnRole::Backlog,
            "ready" => ColumnRole::Ready,
            "doing" => ColumnRole::Doing,
            "review" => ColumnRole::Review,
            "done" => ColumnRole::Done,
            _ => ColumnRole::Other,
        }
    }
}

/// A key file entry used for coarse cross-task conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub position: i32,
}

/// A task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub board_id: i64,
    pub column_id: i64,
    pub identifier: String,
    pub task_type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub position: i64,
    pub parent_id: Option<i64>,

    /// Ordered identifiers of tasks this task depends on (soft references).
    pub dependencies: Vec<String>,
    pub required_capabilities: Vec<String>,
    pub key_files: Vec<KeyFile>,

    pub needs_review: bool,
    pub assigned_to: Option<String>,
    pub claimed_at: Option<i64>,
    pub claim_expires_at: Option<i64>,

    pub completion_note: Option<String>,
    pub reviewed_by: Option<String>,
    pub completed_at: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Whether the task currently holds a live (non-expired) claim.
    pub fn has_active_claim(&self, now: i64) -> bool {
        matches!(self.claim_expires_at, Some(expires) if expires > now)
            && self.claimed_at.is_some()
    }
}

/// A column row. The engine reads identity, ordering and wip_limit; column
/// management beyond that lives with the board collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: i64,
    pub board_id: i64,
    pub name: String,
    pub position: i64,
    pub wip_limit: i64,
}

impl Column {
    pub fn role(&self) -> ColumnRole {
        ColumnRole::from_name(&self.name)
    }
}

/// A board row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: i64,
    pub name: String,
}

/// A dependency entry in task-creation input. Batch creation allows forward
/// references among siblings by zero-based creation index; everywhere else a
/// literal identifier is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRef {
    Index(usize),
    Identifier(String),
}

/// Input for creating a single task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub key_files: Vec<KeyFile>,
    #[serde(default)]
    pub needs_review: bool,
}

/// Input for one child inside a goal batch. Dependencies may reference
/// siblings by creation index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildInput {
    pub task_type: TaskType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub key_files: Vec<KeyFile>,
    #[serde(default)]
    pub needs_review: bool,
}

/// Verdict delivered by a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approve,
    RequestChanges,
}

/// Result of a successful claim: the claimed task plus the context a caller
/// needs to start working without further reads.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimedTask {
    pub task: Task,
    /// Identifiers of the claimed task's (completed) dependencies.
    pub dependencies: Vec<String>,
    /// Key file paths declared by the task.
    pub key_file_paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_role_matches_by_name_case_insensitive() {
        assert_eq!(ColumnRole::from_name("Ready"), ColumnRole::Ready);
        assert_eq!(ColumnRole::from_name("  done "), ColumnRole::Done);
        assert_eq!(ColumnRole::from_name("BACKLOG"), ColumnRole::Backlog);
        assert_eq!(ColumnRole::from_name("Icebox"), ColumnRole::Other);
    }

    #[test]
    fn priority_rank_orders_critical_first() {
        assert!(Priority::Critical.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn goal_is_not_claimable_and_exempt_from_wip() {
        assert!(!TaskType::Goal.is_claimable());
        assert!(!TaskType::Goal.counts_against_wip());
        assert!(TaskType::Work.is_claimable());
        assert!(TaskType::Defect.counts_against_wip());
    }

    #[test]
    fn dependency_ref_deserializes_untagged() {
        let refs: Vec<DependencyRef> = serde_json::from_str(r#"[0, "W3"]"#).unwrap();
        assert_eq!(refs[0], DependencyRef::Index(0));
        assert_eq!(refs[1], DependencyRef::Identifier("W3".to_string()));
    }
}
