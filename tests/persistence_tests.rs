//! Integration tests for on-disk persistence and schema migrations.

use kanban_engine::db::Database;
use kanban_engine::types::{TaskInput, TaskStatus, TaskType};
use kanban_engine::EngineConfig;

#[test]
fn non_positive_claim_ttl_is_rejected_at_open() {
    let err = Database::open_in_memory_with_config(EngineConfig {
        claim_ttl_seconds: 0,
        ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err.code, kanban_engine::ErrorCode::InvalidFieldValue);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");

    let (board_id, done_id, task_id) = {
        let db = Database::open(&path, EngineConfig::default()).unwrap();
        let board = db.create_board("alpha").unwrap();
        db.create_column(board.id, "Ready", None).unwrap();
        let done = db.create_column(board.id, "Done", None).unwrap();
        let ready = db.list_columns(board.id).unwrap()[0].id;
        let task = db
            .create_task(
                ready,
                TaskType::Work,
                TaskInput {
                    title: "persisted".to_string(),
                    ..Default::default()
                },
                None,
                Some("tester"),
            )
            .unwrap();
        db.move_task(task.id, done.id, None, None).unwrap();
        (board.id, done.id, task.id)
    };

    let db = Database::open(&path, EngineConfig::default()).unwrap();
    let task = db.get_task(task_id).unwrap().unwrap();
    assert_eq!(task.board_id, board_id);
    assert_eq!(task.column_id, done_id);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.identifier, "W1");
}

#[test]
fn identifier_counters_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");

    let (board_id, ready_id) = {
        let db = Database::open(&path, EngineConfig::default()).unwrap();
        let board = db.create_board("alpha").unwrap();
        let ready = db.create_column(board.id, "Ready", None).unwrap();
        let t = db
            .create_task(
                ready.id,
                TaskType::Work,
                TaskInput {
                    title: "first".to_string(),
                    ..Default::default()
                },
                None,
                None,
            )
            .unwrap();
        assert_eq!(t.identifier, "W1");
        db.delete_task(t.id, None).unwrap();
        (board.id, ready.id)
    };

    let db = Database::open(&path, EngineConfig::default()).unwrap();
    let t = db
        .create_task(
            ready_id,
            TaskType::Work,
            TaskInput {
                title: "second".to_string(),
                ..Default::default()
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(t.board_id, board_id);
    // Counter state is durable, so display codes never repeat.
    assert_eq!(t.identifier, "W2");
}
