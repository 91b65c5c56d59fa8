//! Structured error types for engine operations.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    InvalidFieldValue,
    SelfDependency,
    DependencyCycle,

    // Capacity
    WipLimitReached,

    // Claim conflicts
    NoTaskAvailable,

    // Authorization
    NotAssignee,

    // Referential
    DependentsExist,

    // Not found
    TaskNotFound,
    ColumnNotFound,
    BoardNotFound,

    // Internal errors
    DatabaseError,
    InternalError,
}

/// Structured error returned by engine operations.
///
/// Expected failure conditions (capacity, lost claim races, validation) are
/// returned as values of this type rather than panics; callers branch on
/// [`ErrorCode`] to decide whether to retry, reselect, or correct input.
#[derive(Debug, Serialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn self_dependency(identifier: &str) -> Self {
        Self::new(
            ErrorCode::SelfDependency,
            format!("Task {} cannot depend on itself", identifier),
        )
        .with_field("dependencies")
    }

    pub fn dependency_cycle(from: &str, via: &str) -> Self {
        Self::new(
            ErrorCode::DependencyCycle,
            format!("Dependency {} -> {} would create a cycle", from, via),
        )
        .with_field("dependencies")
    }

    pub fn wip_limit(column_name: &str, limit: i64) -> Self {
        Self::new(
            ErrorCode::WipLimitReached,
            format!("Column '{}' is at its WIP limit of {}", column_name, limit),
        )
    }

    pub fn no_task_available() -> Self {
        Self::new(ErrorCode::NoTaskAvailable, "No claimable task available")
    }

    pub fn not_assignee(identifier: &str, actor: &str) -> Self {
        Self::new(
            ErrorCode::NotAssignee,
            format!("Task {} is not assigned to {}", identifier, actor),
        )
    }

    pub fn dependents_exist(identifier: &str, dependents: &[String]) -> Self {
        Self::new(
            ErrorCode::DependentsExist,
            format!(
                "Task {} has dependent tasks: {}",
                identifier,
                dependents.join(", ")
            ),
        )
    }

    pub fn task_not_found(task: impl fmt::Display) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {}", task))
    }

    pub fn column_not_found(column_id: i64) -> Self {
        Self::new(
            ErrorCode::ColumnNotFound,
            format!("Column not found: {}", column_id),
        )
    }

    pub fn board_not_found(board_id: i64) -> Self {
        Self::new(
            ErrorCode::BoardNotFound,
            format!("Board not found: {}", board_id),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::database(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::internal(err)
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to EngineError first
        match err.downcast::<EngineError>() {
            Ok(engine_err) => engine_err,
            Err(err) => EngineError::internal(err),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
