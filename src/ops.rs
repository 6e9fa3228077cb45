use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Params, Row};

use crate::model::{Owner, Subtask, Task, TaskFields, User};

/// The server's local calendar date.
fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn read_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
    })
}

/// Reads the eleven metadata columns starting at `at`.
fn read_fields(row: &Row, at: usize) -> rusqlite::Result<TaskFields> {
    Ok(TaskFields {
        title: row.get(at)?,
        created_date: row.get(at + 1)?,
        start_date: row.get(at + 2)?,
        due_date: row.get(at + 3)?,
        start_time: row.get(at + 4)?,
        end_time: row.get(at + 5)?,
        description: row.get(at + 6)?,
        category: row.get(at + 7)?,
        priority: row.get(at + 8)?,
        completed: row.get(at + 9)?,
        archived: row.get(at + 10)?,
    })
}

fn read_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        fields: read_fields(row, 1)?,
        user: Owner {
            id: row.get(12)?,
            username: row.get(13)?,
        },
    })
}

fn read_subtask_row(row: &Row) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        parent_task_id: row.get(1)?,
        fields: read_fields(row, 2)?,
        user: Owner {
            id: row.get(13)?,
            username: row.get(14)?,
        },
    })
}

const SELECT_TASKS: &str = "
SELECT t.id, t.title, t.created_date, t.start_date, t.due_date, t.start_time, t.end_time,
       t.description, t.category, t.priority, t.completed, t.archived, u.id, u.username
FROM tasks t JOIN users u ON u.id = t.user_id
";

const SELECT_SUBTASKS: &str = "
SELECT s.id, s.parent_task_id, s.title, s.created_date, s.start_date, s.due_date,
       s.start_time, s.end_time, s.description, s.category, s.priority, s.completed,
       s.archived, u.id, u.username
FROM subtasks s JOIN users u ON u.id = s.user_id
";

// A NULL id lets SQLite assign the next one, so the conflict arm only runs
// for explicit ids. created_date falls back to today on insert and to the
// stored value on overwrite.
const SAVE_TASK: &str = "
INSERT INTO tasks (id, title, created_date, start_date, due_date, start_time, end_time,
                   description, category, priority, completed, archived, user_id)
VALUES (?1, ?2, COALESCE(?3, ?14), ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    created_date = COALESCE(?3, tasks.created_date),
    start_date = excluded.start_date,
    due_date = excluded.due_date,
    start_time = excluded.start_time,
    end_time = excluded.end_time,
    description = excluded.description,
    category = excluded.category,
    priority = excluded.priority,
    completed = excluded.completed,
    archived = excluded.archived,
    user_id = excluded.user_id
";

const SAVE_SUBTASK: &str = "
INSERT INTO subtasks (id, parent_task_id, title, created_date, start_date, due_date,
                      start_time, end_time, description, category, priority, completed,
                      archived, user_id)
VALUES (?1, ?15, ?2, COALESCE(?3, ?14), ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(id) DO UPDATE SET
    parent_task_id = excluded.parent_task_id,
    title = excluded.title,
    created_date = COALESCE(?3, subtasks.created_date),
    start_date = excluded.start_date,
    due_date = excluded.due_date,
    start_time = excluded.start_time,
    end_time = excluded.end_time,
    description = excluded.description,
    category = excluded.category,
    priority = excluded.priority,
    completed = excluded.completed,
    archived = excluded.archived,
    user_id = excluded.user_id
";

fn save_params<'a>(
    id: &'a Option<i64>,
    owner: &'a i64,
    fields: &'a TaskFields,
    today: &'a NaiveDate,
) -> [&'a dyn rusqlite::ToSql; 14] {
    [
        id,
        &fields.title,
        &fields.created_date,
        &fields.start_date,
        &fields.due_date,
        &fields.start_time,
        &fields.end_time,
        &fields.description,
        &fields.category,
        &fields.priority,
        &fields.completed,
        &fields.archived,
        owner,
        today,
    ]
}

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    read: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, read)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

fn query_one<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    read: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    stmt.query_row(params, read).optional().map_err(Into::into)
}

// ---- users ----

pub fn create_user(conn: &Connection, username: &str, password_hash: &str) -> Result<User> {
    conn.execute(
        "INSERT INTO users (username, password) VALUES (?1, ?2)",
        rusqlite::params![username, password_hash],
    )
    .with_context(|| format!("failed to store user '{username}'"))?;
    Ok(User {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        password: password_hash.to_string(),
    })
}

/// First user (lowest id) whose name contains `query`, ignoring ASCII case.
pub fn find_user_by_username(conn: &Connection, query: &str) -> Result<Option<User>> {
    query_one(
        conn,
        "SELECT id, username, password FROM users
         WHERE instr(lower(username), lower(?1)) > 0
         ORDER BY id LIMIT 1",
        [query],
        read_user_row,
    )
}

// ---- tasks ----

/// Inserts or fully overwrites a task and returns its id.
///
/// With `id` set this is an upsert: a missing row is created under that id,
/// an existing one is overwritten and handed to `owner`.
pub fn save_task(conn: &Connection, owner: i64, id: Option<i64>, fields: &TaskFields) -> Result<i64> {
    let today = today();
    conn.execute(SAVE_TASK, save_params(&id, &owner, fields, &today).as_slice())
        .context("failed to save task")?;
    Ok(id.unwrap_or_else(|| conn.last_insert_rowid()))
}

/// Like [`save_task`] with an explicit id, but leaves rows owned by someone
/// else untouched. Returns whether a row was written.
pub fn save_owned_task(conn: &Connection, owner: i64, id: i64, fields: &TaskFields) -> Result<bool> {
    let today = today();
    let sql = format!("{SAVE_TASK} WHERE tasks.user_id = excluded.user_id");
    let changed = conn
        .execute(&sql, save_params(&Some(id), &owner, fields, &today).as_slice())
        .context("failed to save task")?;
    Ok(changed > 0)
}

pub fn list_tasks_by_owner(conn: &Connection, owner: i64) -> Result<Vec<Task>> {
    let sql = format!("{SELECT_TASKS} WHERE t.user_id = ?1 ORDER BY t.id");
    query_all(conn, &sql, [owner], read_task_row)
}

pub fn get_task_for_owner(conn: &Connection, owner: i64, id: i64) -> Result<Option<Task>> {
    let sql = format!("{SELECT_TASKS} WHERE t.user_id = ?1 AND t.id = ?2");
    query_one(conn, &sql, [owner, id], read_task_row)
}

/// Deletes by id. Absent ids are not an error.
pub fn delete_task(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
    Ok(())
}

pub fn delete_task_for_owner(conn: &Connection, owner: i64, id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
        [id, owner],
    )?;
    Ok(())
}

// ---- subtasks ----

pub fn save_subtask(
    conn: &Connection,
    owner: i64,
    id: Option<i64>,
    parent_task_id: i64,
    fields: &TaskFields,
) -> Result<i64> {
    let today = today();
    let base = save_params(&id, &owner, fields, &today);
    let mut params: Vec<&dyn rusqlite::ToSql> = base.to_vec();
    params.push(&parent_task_id);
    conn.execute(SAVE_SUBTASK, params.as_slice())
        .context("failed to save subtask")?;
    Ok(id.unwrap_or_else(|| conn.last_insert_rowid()))
}

pub fn save_owned_subtask(
    conn: &Connection,
    owner: i64,
    id: i64,
    parent_task_id: i64,
    fields: &TaskFields,
) -> Result<bool> {
    let today = today();
    let id = Some(id);
    let base = save_params(&id, &owner, fields, &today);
    let mut params: Vec<&dyn rusqlite::ToSql> = base.to_vec();
    params.push(&parent_task_id);
    let sql = format!("{SAVE_SUBTASK} WHERE subtasks.user_id = excluded.user_id");
    let changed = conn
        .execute(&sql, params.as_slice())
        .context("failed to save subtask")?;
    Ok(changed > 0)
}

pub fn list_subtasks(conn: &Connection) -> Result<Vec<Subtask>> {
    let sql = format!("{SELECT_SUBTASKS} ORDER BY s.id");
    query_all(conn, &sql, [], read_subtask_row)
}

pub fn list_subtasks_by_owner(conn: &Connection, owner: i64) -> Result<Vec<Subtask>> {
    let sql = format!("{SELECT_SUBTASKS} WHERE s.user_id = ?1 ORDER BY s.id");
    query_all(conn, &sql, [owner], read_subtask_row)
}

pub fn list_subtasks_by_parent(conn: &Connection, parent_task_id: i64) -> Result<Vec<Subtask>> {
    let sql = format!("{SELECT_SUBTASKS} WHERE s.parent_task_id = ?1 ORDER BY s.id");
    query_all(conn, &sql, [parent_task_id], read_subtask_row)
}

pub fn list_subtasks_by_parent_and_owner(
    conn: &Connection,
    parent_task_id: i64,
    owner: i64,
) -> Result<Vec<Subtask>> {
    let sql =
        format!("{SELECT_SUBTASKS} WHERE s.parent_task_id = ?1 AND s.user_id = ?2 ORDER BY s.id");
    query_all(conn, &sql, [parent_task_id, owner], read_subtask_row)
}

pub fn get_subtask(conn: &Connection, id: i64) -> Result<Option<Subtask>> {
    let sql = format!("{SELECT_SUBTASKS} WHERE s.id = ?1");
    query_one(conn, &sql, [id], read_subtask_row)
}

pub fn get_subtask_for_owner(conn: &Connection, owner: i64, id: i64) -> Result<Option<Subtask>> {
    let sql = format!("{SELECT_SUBTASKS} WHERE s.user_id = ?1 AND s.id = ?2");
    query_one(conn, &sql, [owner, id], read_subtask_row)
}

pub fn delete_subtask(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM subtasks WHERE id = ?1", [id])?;
    Ok(())
}

pub fn delete_subtask_for_owner(conn: &Connection, owner: i64, id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM subtasks WHERE id = ?1 AND user_id = ?2",
        [id, owner],
    )?;
    Ok(())
}
