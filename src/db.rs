use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id       INTEGER PRIMARY KEY,
    username TEXT NOT NULL,
    password TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id           INTEGER PRIMARY KEY,
    title        TEXT,
    created_date TEXT,
    start_date   TEXT,
    due_date     TEXT,
    start_time   TEXT,
    end_time     TEXT,
    description  TEXT,
    category     TEXT,
    priority     INTEGER NOT NULL DEFAULT 0,
    completed    INTEGER NOT NULL DEFAULT 0,
    archived     INTEGER NOT NULL DEFAULT 0,
    user_id      INTEGER NOT NULL REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS subtasks (
    id             INTEGER PRIMARY KEY,
    parent_task_id INTEGER NOT NULL,
    title          TEXT,
    created_date   TEXT,
    start_date     TEXT,
    due_date       TEXT,
    start_time     TEXT,
    end_time       TEXT,
    description    TEXT,
    category       TEXT,
    priority       INTEGER NOT NULL DEFAULT 0,
    completed      INTEGER NOT NULL DEFAULT 0,
    archived       INTEGER NOT NULL DEFAULT 0,
    user_id        INTEGER NOT NULL REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS tasks_user ON tasks(user_id);
CREATE INDEX IF NOT EXISTS subtasks_parent ON subtasks(parent_task_id);
";

fn set_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    set_pragmas(&conn)?;
    Ok(conn)
}

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    set_pragmas(&conn)?;
    init(&conn)?;
    Ok(conn)
}

/// A connection shared between request handlers.
///
/// Every request does one or two short statements, so a single connection
/// behind a mutex is enough; SQLite serializes writers anyway.
#[derive(Clone)]
pub struct Db(Arc<Mutex<Connection>>);

impl Db {
    pub fn new(conn: Connection) -> Self {
        Self(Arc::new(Mutex::new(conn)))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.0
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }
}
