use anyhow::{bail, Result};
use rusqlite::Connection;

use crate::auth::{self, CurrentUserProvider};
use crate::model::{assigned_id, NewUser, Subtask, SubtaskBody, Task, TaskBody, User};
use crate::ops;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' is required")]
    MissingField(&'static str),
}

/// Hash the supplied password in place, then store the user.
pub fn register(conn: &Connection, user: &mut NewUser) -> Result<User> {
    hash_new_user(user)?;
    store_new_user(conn, user)
}

/// Validate a registration and replace its password with the hash.
///
/// Split from [`store_new_user`] so the HTTP layer can hash without holding
/// the database.
pub fn hash_new_user(user: &mut NewUser) -> Result<()> {
    if user.username.is_none() {
        bail!(ValidationError::MissingField("username"));
    }
    let Some(password) = user.password.as_deref() else {
        bail!(ValidationError::MissingField("password"));
    };
    user.password = Some(auth::hash_password(password)?);
    Ok(())
}

/// Store a registration whose password is already hashed.
pub fn store_new_user(conn: &Connection, user: &NewUser) -> Result<User> {
    let Some(username) = user.username.as_deref() else {
        bail!(ValidationError::MissingField("username"));
    };
    let Some(hash) = user.password.as_deref() else {
        bail!(ValidationError::MissingField("password"));
    };
    ops::create_user(conn, username, hash)
}

// ---- tasks ----

pub fn add_task(conn: &Connection, who: &impl CurrentUserProvider, task: &TaskBody) -> Result<i64> {
    let user = who.current_user()?;
    ops::save_task(conn, user.id, None, &task.fields)
}

pub fn list_tasks(conn: &Connection, who: &impl CurrentUserProvider) -> Result<Vec<Task>> {
    let user = who.current_user()?;
    ops::list_tasks_by_owner(conn, user.id)
}

pub fn get_task(conn: &Connection, who: &impl CurrentUserProvider, id: i64) -> Result<Option<Task>> {
    let user = who.current_user()?;
    ops::get_task_for_owner(conn, user.id, id)
}

/// Full overwrite keyed by the body's id, creating the row if it is absent.
/// The caller becomes the owner whatever the row held before.
pub fn update_task(conn: &Connection, who: &impl CurrentUserProvider, task: &TaskBody) -> Result<i64> {
    let user = who.current_user()?;
    ops::save_task(conn, user.id, assigned_id(task.id), &task.fields)
}

/// Like [`update_task`], but a row owned by someone else is left alone.
/// Returns `None` when nothing was written.
pub fn update_owned_task(
    conn: &Connection,
    who: &impl CurrentUserProvider,
    task: &TaskBody,
) -> Result<Option<i64>> {
    let user = who.current_user()?;
    match assigned_id(task.id) {
        None => ops::save_task(conn, user.id, None, &task.fields).map(Some),
        Some(id) => {
            let written = ops::save_owned_task(conn, user.id, id, &task.fields)?;
            Ok(written.then_some(id))
        }
    }
}

/// Deletes any task by id, whoever owns it.
pub fn delete_task(conn: &Connection, id: i64) -> Result<()> {
    ops::delete_task(conn, id)
}

pub fn delete_owned_task(conn: &Connection, who: &impl CurrentUserProvider, id: i64) -> Result<()> {
    let user = who.current_user()?;
    ops::delete_task_for_owner(conn, user.id, id)
}

// ---- subtasks ----

/// Store a subtask under `parent_task_id`. The parent is not checked.
pub fn add_subtask(
    conn: &Connection,
    who: &impl CurrentUserProvider,
    subtask: &SubtaskBody,
    parent_task_id: i64,
) -> Result<i64> {
    let user = who.current_user()?;
    ops::save_subtask(conn, user.id, None, parent_task_id, &subtask.fields)
}

/// Every subtask of every user.
pub fn list_all_subtasks(conn: &Connection) -> Result<Vec<Subtask>> {
    ops::list_subtasks(conn)
}

pub fn list_owned_subtasks(conn: &Connection, who: &impl CurrentUserProvider) -> Result<Vec<Subtask>> {
    let user = who.current_user()?;
    ops::list_subtasks_by_owner(conn, user.id)
}

/// Subtasks under a parent regardless of owner. The caller must still
/// resolve to a user.
pub fn list_subtasks_for_task(
    conn: &Connection,
    who: &impl CurrentUserProvider,
    parent_task_id: i64,
) -> Result<Vec<Subtask>> {
    who.current_user()?;
    ops::list_subtasks_by_parent(conn, parent_task_id)
}

pub fn list_owned_subtasks_for_task(
    conn: &Connection,
    who: &impl CurrentUserProvider,
    parent_task_id: i64,
) -> Result<Vec<Subtask>> {
    let user = who.current_user()?;
    ops::list_subtasks_by_parent_and_owner(conn, parent_task_id, user.id)
}

pub fn get_subtask(conn: &Connection, id: i64) -> Result<Option<Subtask>> {
    ops::get_subtask(conn, id)
}

pub fn get_owned_subtask(
    conn: &Connection,
    who: &impl CurrentUserProvider,
    id: i64,
) -> Result<Option<Subtask>> {
    let user = who.current_user()?;
    ops::get_subtask_for_owner(conn, user.id, id)
}

pub fn update_subtask(
    conn: &Connection,
    who: &impl CurrentUserProvider,
    subtask: &SubtaskBody,
) -> Result<i64> {
    let user = who.current_user()?;
    ops::save_subtask(
        conn,
        user.id,
        assigned_id(subtask.id),
        subtask.parent_task_id,
        &subtask.fields,
    )
}

pub fn update_owned_subtask(
    conn: &Connection,
    who: &impl CurrentUserProvider,
    subtask: &SubtaskBody,
) -> Result<Option<i64>> {
    let user = who.current_user()?;
    match assigned_id(subtask.id) {
        None => ops::save_subtask(conn, user.id, None, subtask.parent_task_id, &subtask.fields)
            .map(Some),
        Some(id) => {
            let written = ops::save_owned_subtask(
                conn,
                user.id,
                id,
                subtask.parent_task_id,
                &subtask.fields,
            )?;
            Ok(written.then_some(id))
        }
    }
}

pub fn delete_subtask(conn: &Connection, id: i64) -> Result<()> {
    ops::delete_subtask(conn, id)
}

pub fn delete_owned_subtask(conn: &Connection, who: &impl CurrentUserProvider, id: i64) -> Result<()> {
    let user = who.current_user()?;
    ops::delete_subtask_for_owner(conn, user.id, id)
}
