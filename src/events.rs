//! Change-event feed for the notification collaborator.
//!
//! Every committed mutation produces a [`ChangeEvent`] carrying the full
//! post-mutation task snapshot, scoped to a board. Subscribers register a
//! channel (optionally filtered to one board) and receive events after the
//! owning transaction commits; events are never emitted for aborted
//! transactions.

use crate::types::Task;
use serde::Serialize;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

/// Kind of change that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventKind {
    TaskCreated,
    TaskUpdated,
    TaskMoved,
    TaskClaimed,
    TaskCompleted,
    TaskReviewed,
    TaskDeleted,
}

impl ChangeEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventKind::TaskCreated => "task_created",
            ChangeEventKind::TaskUpdated => "task_updated",
            ChangeEventKind::TaskMoved => "task_moved",
            ChangeEventKind::TaskClaimed => "task_claimed",
            ChangeEventKind::TaskCompleted => "task_completed",
            ChangeEventKind::TaskReviewed => "task_reviewed",
            ChangeEventKind::TaskDeleted => "task_deleted",
        }
    }
}

/// A change event with the full post-mutation task snapshot.
///
/// For `TaskDeleted` the snapshot is the last state before the row was
/// removed.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeEventKind,
    pub board_id: i64,
    pub task: Task,
}

#[derive(Debug)]
struct Subscriber {
    board_id: Option<i64>,
    sender: Sender<ChangeEvent>,
}

/// Fan-out of change events to registered subscribers.
///
/// Thread-safe: uses an internal `Mutex` so it can be shared across threads
/// without requiring `&mut self`. Disconnected subscribers are dropped on the
/// next publish.
#[derive(Debug)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to events, optionally filtered to a single board.
    pub fn subscribe(&self, board_id: Option<i64>) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel();
        let mut subs = self.subscribers.lock().unwrap();
        subs.push(Subscriber {
            board_id,
            sender: tx,
        });
        rx
    }

    /// Publish a batch of events from one committed transaction.
    pub fn publish_all(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|sub| {
            for event in events {
                if sub.board_id.is_none_or(|b| b == event.board_id) {
                    if sub.sender.send(event.clone()).is_err() {
                        return false;
                    }
                }
            }
            true
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
