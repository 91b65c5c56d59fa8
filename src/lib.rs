//! Kanban consistency engine.
//!
//! Coordinates tasks on kanban boards worked by humans and autonomous
//! agents: dense collision-free ordering under concurrent moves, per-column
//! WIP limits, an acyclic dependency graph with derived blocked/open status,
//! at-most-one-active-claim arbitration, and goal containers whose placement
//! follows their children. All guarantees are transactional, built on
//! SQLite constraints rather than in-process locks.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod types;

pub use config::EngineConfig;
pub use db::Database;
pub use error::{EngineError, EngineResult, ErrorCode};
pub use events::{ChangeEvent, ChangeEventKind};
pub use types::{
    Board, ChildInput, ClaimedTask, Column, ColumnRole, DependencyRef, KeyFile, Priority,
    ReviewVerdict, Task, TaskInput, TaskStatus, TaskType,
};
