//! Integration tests for claiming, WIP admission control, and the review
//! handoff.

use kanban_engine::db::Database;
use kanban_engine::types::{
    KeyFile, Priority, ReviewVerdict, TaskInput, TaskStatus, TaskType,
};
use kanban_engine::{EngineConfig, ErrorCode};

struct Fixture {
    db: Database,
    board: i64,
    ready: i64,
    doing: i64,
    review: i64,
    done: i64,
}

fn setup() -> Fixture {
    setup_with_config(EngineConfig::default())
}

fn setup_with_config(config: EngineConfig) -> Fixture {
    let db = Database::open_in_memory_with_config(config).expect("in-memory database");
    let board = db.create_board("alpha").unwrap();
    db.create_column(board.id, "Backlog", None).unwrap();
    let ready = db.create_column(board.id, "Ready", None).unwrap().id;
    let doing = db.create_column(board.id, "Doing", None).unwrap().id;
    let review = db.create_column(board.id, "Review", None).unwrap().id;
    let done = db.create_column(board.id, "Done", None).unwrap().id;
    Fixture {
        db,
        board: board.id,
        ready,
        doing,
        review,
        done,
    }
}

fn work(db: &Database, column: i64, input: TaskInput) -> kanban_engine::Task {
    db.create_task(column, TaskType::Work, input, None, Some("tester"))
        .unwrap()
}

fn titled(title: &str) -> TaskInput {
    TaskInput {
        title: title.to_string(),
        ..Default::default()
    }
}

mod claim_selection_tests {
    use super::*;

    #[test]
    fn claim_takes_highest_priority_then_lowest_position() {
        let f = setup();
        work(&f.db, f.ready, titled("first-medium"));
        let critical_1 = work(
            &f.db,
            f.ready,
            TaskInput {
                priority: Some(Priority::Critical),
                ..titled("critical-1")
            },
        );
        work(
            &f.db,
            f.ready,
            TaskInput {
                priority: Some(Priority::Critical),
                ..titled("critical-2")
            },
        );

        let claimed = f.db.claim_next("agent-a", &[], f.board, None).unwrap();
        assert_eq!(claimed.task.id, critical_1.id);
    }

    #[test]
    fn claimed_task_moves_to_doing_with_an_active_claim() {
        let f = setup();
        work(&f.db, f.ready, titled("a"));

        let claimed = f.db.claim_next("agent-a", &[], f.board, None).unwrap();
        let task = claimed.task;
        assert_eq!(task.column_id, f.doing);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_to.as_deref(), Some("agent-a"));
        assert!(task.claimed_at.is_some());
        assert!(task.claim_expires_at.unwrap() > task.claimed_at.unwrap());
    }

    #[test]
    fn second_claim_of_the_same_task_reports_no_task_available() {
        let f = setup();
        let a = work(&f.db, f.ready, titled("a"));
        f.db.claim_next("agent-a", &[], f.board, Some(&a.identifier))
            .unwrap();

        let err = f
            .db
            .claim_next("agent-b", &[], f.board, Some(&a.identifier))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoTaskAvailable);
    }

    #[test]
    fn empty_ready_column_reports_no_task_available() {
        let f = setup();
        let err = f.db.claim_next("agent-a", &[], f.board, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoTaskAvailable);
    }

    #[test]
    fn blocked_tasks_are_skipped() {
        let f = setup();
        let a = work(&f.db, f.ready, titled("a"));
        let blocked = work(
            &f.db,
            f.ready,
            TaskInput {
                priority: Some(Priority::Critical),
                dependencies: vec![a.identifier.clone()],
                ..titled("blocked")
            },
        );
        assert_eq!(blocked.status, TaskStatus::Blocked);

        // The critical-but-blocked task is passed over for the open one.
        let claimed = f.db.claim_next("agent-a", &[], f.board, None).unwrap();
        assert_eq!(claimed.task.id, a.id);
    }

    #[test]
    fn capability_matching_requires_a_superset() {
        let f = setup();
        work(
            &f.db,
            f.ready,
            TaskInput {
                required_capabilities: vec!["rust".to_string(), "sql".to_string()],
                ..titled("specialist")
            },
        );

        let err = f
            .db
            .claim_next("agent-a", &["rust".to_string()], f.board, None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoTaskAvailable);

        let caps = vec!["rust".to_string(), "sql".to_string(), "docs".to_string()];
        let claimed = f.db.claim_next("agent-b", &caps, f.board, None).unwrap();
        assert_eq!(claimed.task.assigned_to.as_deref(), Some("agent-b"));
    }

    #[test]
    fn unconstrained_task_is_claimable_by_anyone() {
        let f = setup();
        work(&f.db, f.ready, titled("a"));
        let claimed = f.db.claim_next("agent-a", &[], f.board, None).unwrap();
        assert!(claimed.task.required_capabilities.is_empty());
    }

    #[test]
    fn key_file_overlap_with_active_work_defers_the_claim() {
        let f = setup();
        let shared = KeyFile {
            path: "src/store.rs".to_string(),
            note: None,
            position: 0,
        };
        work(
            &f.db,
            f.ready,
            TaskInput {
                key_files: vec![shared.clone()],
                ..titled("holder")
            },
        );
        work(
            &f.db,
            f.ready,
            TaskInput {
                key_files: vec![shared],
                ..titled("conflicting")
            },
        );
        let free = work(&f.db, f.ready, titled("free"));

        let first = f.db.claim_next("agent-a", &[], f.board, None).unwrap();
        assert_eq!(first.task.title, "holder");

        // The second claimant skips the path conflict and takes the free task.
        let second = f.db.claim_next("agent-b", &[], f.board, None).unwrap();
        assert_eq!(second.task.id, free.id);

        let err = f.db.claim_next("agent-c", &[], f.board, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoTaskAvailable);
    }

    #[test]
    fn claim_expiry_honors_the_configured_ttl() {
        let f = setup_with_config(EngineConfig {
            claim_ttl_seconds: 120,
            ..Default::default()
        });
        work(&f.db, f.ready, titled("a"));

        let claimed = f.db.claim_next("agent-a", &[], f.board, None).unwrap().task;
        let claimed_at = claimed.claimed_at.unwrap();
        assert_eq!(claimed.claim_expires_at.unwrap(), claimed_at + 120_000);
    }

    #[test]
    fn task_moved_back_to_ready_is_reclaimable() {
        let f = setup();
        let a = work(&f.db, f.ready, titled("a"));
        f.db.claim_next("agent-a", &[], f.board, None).unwrap();

        // A board-level move back to Ready reopens the task; the next
        // claimant takes it over even though the old claim never expired.
        f.db.move_task(a.id, f.ready, None, None).unwrap();

        let reclaimed = f.db.claim_next("agent-b", &[], f.board, None).unwrap();
        assert_eq!(reclaimed.task.id, a.id);
        assert_eq!(reclaimed.task.assigned_to.as_deref(), Some("agent-b"));
    }

    #[test]
    fn claim_response_carries_dependencies_and_key_paths() {
        let f = setup();
        let dep = work(&f.db, f.ready, titled("dep"));
        f.db.move_task(dep.id, f.done, None, None).unwrap();
        work(
            &f.db,
            f.ready,
            TaskInput {
                dependencies: vec![dep.identifier.clone()],
                key_files: vec![KeyFile {
                    path: "src/api.rs".to_string(),
                    note: Some("entry point".to_string()),
                    position: 0,
                }],
                ..titled("a")
            },
        );

        let claimed = f.db.claim_next("agent-a", &[], f.board, None).unwrap();
        assert_eq!(claimed.dependencies, vec![dep.identifier]);
        assert_eq!(claimed.key_file_paths, vec!["src/api.rs".to_string()]);
    }
}

mod wip_tests {
    use super::*;

    #[test]
    fn creation_beyond_the_wip_limit_is_rejected() {
        let f = setup();
        let limited = f.db.create_column(f.board, "Staging", Some(2)).unwrap().id;
        work(&f.db, limited, titled("a"));
        work(&f.db, limited, titled("b"));

        let err = f
            .db
            .create_task(limited, TaskType::Work, titled("c"), None, None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::WipLimitReached);
        assert_eq!(f.db.list_column_tasks(limited).unwrap().len(), 2);
    }

    #[test]
    fn goals_do_not_count_against_the_limit() {
        let f = setup();
        let limited = f.db.create_column(f.board, "Staging", Some(2)).unwrap().id;
        work(&f.db, limited, titled("a"));
        work(&f.db, limited, titled("b"));

        // A goal is admitted into a full column and leaves the count at 2.
        let (goal, _children) = f
            .db
            .create_goal_with_children(limited, titled("container"), vec![], None)
            .unwrap();
        assert_eq!(goal.task_type, TaskType::Goal);

        let err = f
            .db
            .create_task(limited, TaskType::Work, titled("c"), None, None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::WipLimitReached);
    }

    #[test]
    fn move_into_a_full_column_aborts_without_side_effects() {
        let f = setup();
        let limited = f.db.create_column(f.board, "Staging", Some(1)).unwrap().id;
        work(&f.db, limited, titled("occupant"));
        let a = work(&f.db, f.ready, titled("a"));
        let b = work(&f.db, f.ready, titled("b"));

        let err = f.db.move_task(a.id, limited, None, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::WipLimitReached);

        let untouched = f.db.get_task(a.id).unwrap().unwrap();
        assert_eq!(untouched.column_id, f.ready);
        assert_eq!(untouched.position, 0);
        assert_eq!(f.db.get_task(b.id).unwrap().unwrap().position, 1);
    }

    #[test]
    fn defects_count_against_the_limit() {
        let f = setup();
        let limited = f.db.create_column(f.board, "Staging", Some(1)).unwrap().id;
        f.db.create_task(limited, TaskType::Defect, titled("d"), None, None)
            .unwrap();

        let err = f
            .db
            .create_task(limited, TaskType::Work, titled("a"), None, None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::WipLimitReached);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let f = setup();
        for i in 0..10 {
            work(&f.db, f.ready, titled(&format!("task-{i}")));
        }
        assert_eq!(f.db.list_column_tasks(f.ready).unwrap().len(), 10);
    }
}

mod review_tests {
    use super::*;

    fn claimed(f: &Fixture, input: TaskInput, actor: &str) -> kanban_engine::Task {
        let t = work(&f.db, f.ready, input);
        f.db.claim_next(actor, &[], f.board, Some(&t.identifier))
            .unwrap()
            .task
    }

    #[test]
    fn submit_moves_a_reviewed_task_to_review_still_claimed() {
        let f = setup();
        let t = claimed(
            &f,
            TaskInput {
                needs_review: true,
                ..titled("a")
            },
            "agent-a",
        );

        let submitted = f
            .db
            .submit_for_review(t.id, "agent-a", Some("done, see notes"))
            .unwrap();
        assert_eq!(submitted.column_id, f.review);
        assert_eq!(submitted.status, TaskStatus::InProgress);
        assert_eq!(submitted.completion_note.as_deref(), Some("done, see notes"));
        assert_eq!(submitted.assigned_to.as_deref(), Some("agent-a"));
    }

    #[test]
    fn submit_without_review_requirement_goes_straight_to_done() {
        let f = setup();
        let t = claimed(&f, titled("a"), "agent-a");

        let finished = f.db.submit_for_review(t.id, "agent-a", None).unwrap();
        assert_eq!(finished.column_id, f.done);
        assert_eq!(finished.status, TaskStatus::Completed);
        assert!(finished.completed_at.is_some());
        assert!(finished.claimed_at.is_none());
        // The assignee is kept as completion metadata.
        assert_eq!(finished.assigned_to.as_deref(), Some("agent-a"));
    }

    #[test]
    fn only_the_assignee_may_submit() {
        let f = setup();
        let t = claimed(&f, titled("a"), "agent-a");

        let err = f.db.submit_for_review(t.id, "agent-b", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAssignee);
    }

    #[test]
    fn approval_completes_and_unblocks_dependents() {
        let f = setup();
        let t = claimed(
            &f,
            TaskInput {
                needs_review: true,
                ..titled("a")
            },
            "agent-a",
        );
        let dependent = work(
            &f.db,
            f.ready,
            TaskInput {
                dependencies: vec![t.identifier.clone()],
                ..titled("waiter")
            },
        );
        assert_eq!(dependent.status, TaskStatus::Blocked);

        f.db.submit_for_review(t.id, "agent-a", None).unwrap();
        let approved = f
            .db
            .review_task(t.id, "reviewer-1", ReviewVerdict::Approve)
            .unwrap();
        assert_eq!(approved.column_id, f.done);
        assert_eq!(approved.status, TaskStatus::Completed);
        assert_eq!(approved.reviewed_by.as_deref(), Some("reviewer-1"));

        let dependent = f.db.get_task(dependent.id).unwrap().unwrap();
        assert_eq!(dependent.status, TaskStatus::Open);
    }

    #[test]
    fn requested_changes_return_the_task_to_doing_still_claimed() {
        let f = setup();
        let t = claimed(
            &f,
            TaskInput {
                needs_review: true,
                ..titled("a")
            },
            "agent-a",
        );
        f.db.submit_for_review(t.id, "agent-a", None).unwrap();

        let returned = f
            .db
            .review_task(t.id, "reviewer-1", ReviewVerdict::RequestChanges)
            .unwrap();
        assert_eq!(returned.column_id, f.doing);
        assert_eq!(returned.status, TaskStatus::InProgress);
        assert_eq!(returned.assigned_to.as_deref(), Some("agent-a"));
        assert!(returned.claimed_at.is_some());
    }

    #[test]
    fn review_verdict_outside_the_review_column_is_rejected() {
        let f = setup();
        let t = claimed(&f, titled("a"), "agent-a");
        // Straight-to-Done task is not awaiting review.
        let err = f
            .db
            .review_task(t.id, "reviewer-1", ReviewVerdict::Approve)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldValue);
    }
}

mod unclaim_tests {
    use super::*;

    #[test]
    fn unclaim_returns_the_task_to_ready_open() {
        let f = setup();
        let t = work(&f.db, f.ready, titled("a"));
        f.db.claim_next("agent-a", &[], f.board, Some(&t.identifier))
            .unwrap();

        let released = f.db.unclaim_task(t.id, "agent-a").unwrap();
        assert_eq!(released.column_id, f.ready);
        assert_eq!(released.status, TaskStatus::Open);
        assert!(released.assigned_to.is_none());
        assert!(released.claimed_at.is_none());
        assert!(released.claim_expires_at.is_none());
    }

    #[test]
    fn only_the_assignee_may_unclaim() {
        let f = setup();
        let t = work(&f.db, f.ready, titled("a"));
        f.db.claim_next("agent-a", &[], f.board, Some(&t.identifier))
            .unwrap();

        let err = f.db.unclaim_task(t.id, "agent-b").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAssignee);
    }

    #[test]
    fn unclaiming_an_unclaimed_task_is_rejected() {
        let f = setup();
        let t = work(&f.db, f.ready, titled("a"));
        let err = f.db.unclaim_task(t.id, "agent-a").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldValue);
    }

    #[test]
    fn unclaimed_task_is_immediately_claimable_by_another_actor() {
        let f = setup();
        let t = work(&f.db, f.ready, titled("a"));
        f.db.claim_next("agent-a", &[], f.board, Some(&t.identifier))
            .unwrap();
        f.db.unclaim_task(t.id, "agent-a").unwrap();

        let reclaimed = f.db.claim_next("agent-b", &[], f.board, None).unwrap();
        assert_eq!(reclaimed.task.id, t.id);
        assert_eq!(reclaimed.task.assigned_to.as_deref(), Some("agent-b"));
    }
}
