//! Storage layer for the kanban consistency engine.
//!
//! Every external operation runs inside exactly one SQLite transaction.
//! Mutual exclusion comes entirely from storage-level constraints: the
//! `UNIQUE(column_id, position)` index rejects colliding concurrent position
//! writes, and claim acquisition re-checks its predicate in the final
//! conditional update. A losing transaction fails fast; nothing blocks.

pub mod claims;
pub mod columns;
pub mod deps;
pub mod goals;
pub mod history;
pub mod positions;
pub mod tasks;
pub mod wip;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeEvent, EventBus};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection and the change-event feed.
#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    events: Arc<EventBus>,
    config: EngineConfig,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> EngineResult<Self> {
        check_config(&config)?;
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            events: Arc::new(EventBus::new()),
            config,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::open_in_memory_with_config(EngineConfig::default())
    }

    /// Open an in-memory database with a custom configuration.
    pub fn open_in_memory_with_config(config: EngineConfig) -> EngineResult<Self> {
        check_config(&config)?;
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            events: Arc::new(EventBus::new()),
            config,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations.
    fn run_migrations(&self) -> EngineResult<()> {
        let mut conn = self.conn.lock().unwrap();
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(EngineError::database)?;
        Ok(())
    }

    /// The engine configuration this handle was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The change-event feed for this database.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute a read-only function with exclusive access to the connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a mutating operation inside one transaction.
    ///
    /// Change events accumulated by the closure are published only after the
    /// transaction commits; an error rolls everything back and publishes
    /// nothing, so no reader observes a partially applied operation.
    pub(crate) fn in_transaction<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Transaction, &mut Vec<ChangeEvent>) -> EngineResult<T>,
    {
        let (out, events) = {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let mut pending = Vec::new();
            let out = f(&tx, &mut pending)?;
            tx.commit()?;
            (out, pending)
        };
        self.events.publish_all(&events);
        Ok(out)
    }
}

fn check_config(config: &EngineConfig) -> EngineResult<()> {
    config
        .validate()
        .map_err(|e| EngineError::new(crate::error::ErrorCode::InvalidFieldValue, e.to_string()))
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
