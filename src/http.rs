//! JSON-over-HTTP surface under `/main`.
//!
//! Every route except `/main/register` requires HTTP Basic credentials. The
//! configured [`Scoping`] decides which service variant a handler calls.

use anyhow::{Context, Result};
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{self, AuthError, Authenticated};
use crate::config::{Scoping, ServerConfig};
use crate::db::Db;
use crate::model::{NewUser, Subtask, SubtaskBody, Task, TaskBody};
use crate::service::{self, ValidationError};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub scoping: Scoping,
}

/// Failure on its way to becoming a response.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(err) = self.0.downcast_ref::<AuthError>() {
            warn!("rejected request: {err}");
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"taskdeck\"")],
                "Unauthorized",
            )
                .into_response();
        }
        if let Some(err) = self.0.downcast_ref::<ValidationError>() {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
        error!("request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    }
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let creds = auth::parse_basic(header)?;
        let db = state.db.clone();
        let user = tokio::task::spawn_blocking(move || {
            let user = {
                let conn = db.lock()?;
                auth::lookup(&conn, &creds)?
            };
            auth::check_password(user, &creds)
        })
        .await??;
        Ok(Authenticated(user))
    }
}

/// Run `f` against the shared connection on the blocking pool, so async
/// workers never wait on the mutex.
async fn with_conn<T, F>(db: &Db, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    let out = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        f(&conn)
    })
    .await??;
    Ok(out)
}

fn found<T: Serialize>(item: Option<T>) -> Response {
    match item {
        Some(item) => Json(item).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn written(id: Option<i64>, message: &'static str) -> Response {
    match id {
        Some(_) => message.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn register(
    State(state): State<AppState>,
    Json(mut user): Json<NewUser>,
) -> Result<&'static str, ApiError> {
    let user = tokio::task::spawn_blocking(move || {
        service::hash_new_user(&mut user)?;
        anyhow::Ok(user)
    })
    .await??;
    let stored = with_conn(&state.db, move |conn| service::store_new_user(conn, &user)).await?;
    info!("registered user '{}' (id {})", stored.username, stored.id);
    Ok("Registered successfully")
}

// ---- tasks ----

async fn add_task(
    State(state): State<AppState>,
    who: Authenticated,
    Json(task): Json<TaskBody>,
) -> Result<&'static str, ApiError> {
    with_conn(&state.db, move |conn| service::add_task(conn, &who, &task)).await?;
    Ok("Added task successfully")
}

async fn list_tasks(
    State(state): State<AppState>,
    who: Authenticated,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = with_conn(&state.db, move |conn| service::list_tasks(conn, &who)).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    who: Authenticated,
    Path(task_id): Path<i64>,
) -> Result<Response, ApiError> {
    let task = with_conn(&state.db, move |conn| service::get_task(conn, &who, task_id)).await?;
    Ok(found(task))
}

async fn update_task(
    State(state): State<AppState>,
    who: Authenticated,
    Json(task): Json<TaskBody>,
) -> Result<Response, ApiError> {
    let scoping = state.scoping;
    let id = with_conn(&state.db, move |conn| match scoping {
        Scoping::Legacy => service::update_task(conn, &who, &task).map(Some),
        Scoping::Owner => service::update_owned_task(conn, &who, &task),
    })
    .await?;
    Ok(written(id, "Successfully updated task"))
}

async fn delete_task(
    State(state): State<AppState>,
    who: Authenticated,
    Path(task_id): Path<i64>,
) -> Result<&'static str, ApiError> {
    let scoping = state.scoping;
    with_conn(&state.db, move |conn| match scoping {
        Scoping::Legacy => service::delete_task(conn, task_id),
        Scoping::Owner => service::delete_owned_task(conn, &who, task_id),
    })
    .await?;
    Ok("Deleted task")
}

// ---- subtasks ----

async fn add_subtask(
    State(state): State<AppState>,
    who: Authenticated,
    Path(task_id): Path<i64>,
    Json(subtask): Json<SubtaskBody>,
) -> Result<&'static str, ApiError> {
    with_conn(&state.db, move |conn| {
        service::add_subtask(conn, &who, &subtask, task_id)
    })
    .await?;
    Ok("Added task successfully")
}

async fn list_subtasks(
    State(state): State<AppState>,
    who: Authenticated,
) -> Result<Json<Vec<Subtask>>, ApiError> {
    let scoping = state.scoping;
    let subtasks = with_conn(&state.db, move |conn| match scoping {
        Scoping::Legacy => service::list_all_subtasks(conn),
        Scoping::Owner => service::list_owned_subtasks(conn, &who),
    })
    .await?;
    Ok(Json(subtasks))
}

async fn list_subtasks_for_task(
    State(state): State<AppState>,
    who: Authenticated,
    Path(task_id): Path<i64>,
) -> Result<Json<Vec<Subtask>>, ApiError> {
    let scoping = state.scoping;
    let subtasks = with_conn(&state.db, move |conn| match scoping {
        Scoping::Legacy => service::list_subtasks_for_task(conn, &who, task_id),
        Scoping::Owner => service::list_owned_subtasks_for_task(conn, &who, task_id),
    })
    .await?;
    Ok(Json(subtasks))
}

async fn get_subtask(
    State(state): State<AppState>,
    who: Authenticated,
    Path(subtask_id): Path<i64>,
) -> Result<Response, ApiError> {
    let scoping = state.scoping;
    let subtask = with_conn(&state.db, move |conn| match scoping {
        Scoping::Legacy => service::get_subtask(conn, subtask_id),
        Scoping::Owner => service::get_owned_subtask(conn, &who, subtask_id),
    })
    .await?;
    Ok(found(subtask))
}

async fn update_subtask(
    State(state): State<AppState>,
    who: Authenticated,
    Json(subtask): Json<SubtaskBody>,
) -> Result<Response, ApiError> {
    let scoping = state.scoping;
    let id = with_conn(&state.db, move |conn| match scoping {
        Scoping::Legacy => service::update_subtask(conn, &who, &subtask).map(Some),
        Scoping::Owner => service::update_owned_subtask(conn, &who, &subtask),
    })
    .await?;
    Ok(written(id, "Successfully updated task"))
}

async fn delete_subtask(
    State(state): State<AppState>,
    who: Authenticated,
    Path(subtask_id): Path<i64>,
) -> Result<&'static str, ApiError> {
    let scoping = state.scoping;
    with_conn(&state.db, move |conn| match scoping {
        Scoping::Legacy => service::delete_subtask(conn, subtask_id),
        Scoping::Owner => service::delete_owned_subtask(conn, &who, subtask_id),
    })
    .await?;
    Ok("Deleted task")
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/main/register", post(register))
        .route("/main/add", post(add_task))
        .route("/main/tasks", get(list_tasks))
        .route("/main/tasks/update", put(update_task))
        .route("/main/tasks/{task_id}", get(get_task))
        .route("/main/task/{task_id}", delete(delete_task))
        .route("/main/{task_id}/add/subtask", post(add_subtask))
        .route("/main/{task_id}/subtasks", get(list_subtasks_for_task))
        .route("/main/subtasks", get(list_subtasks))
        .route("/main/subtasks/update", put(update_subtask))
        .route(
            "/main/subtasks/{subtask_id}",
            get(get_subtask).delete(delete_subtask),
        )
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(db: Db, config: ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(
        "listening on {} (scoping={})",
        listener.local_addr()?,
        config.scoping
    );
    let app = router(AppState {
        db,
        scoping: config.scoping,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(scoping: Scoping) -> Router {
        let db = Db::new(db::open_memory().unwrap());
        router(AppState { db, scoping })
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            let creds = STANDARD.encode(format!("{user}:pw-{user}"));
            req = req.header(header::AUTHORIZATION, format!("Basic {creds}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn signup(app: &Router, user: &str) {
        let body = json!({"username": user, "password": format!("pw-{user}")});
        let (status, text) = send(app, "POST", "/main/register", None, Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Registered successfully");
    }

    fn json_of(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn task_lifecycle() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;

        let (status, text) =
            send(&app, "POST", "/main/add", Some("ann"), Some(json!({"title": "A"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Added task successfully");

        let (status, body) = send(&app, "GET", "/main/tasks", Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
        let tasks = json_of(&body);
        assert_eq!(tasks.as_array().unwrap().len(), 1);
        assert_eq!(tasks[0]["title"], "A");
        assert!(!tasks[0]["createdDate"].is_null());
        assert!(tasks[0]["user"].get("password").is_none());
        let id = tasks[0]["id"].as_i64().unwrap();

        let (status, text) = send(
            &app,
            "PUT",
            "/main/tasks/update",
            Some("ann"),
            Some(json!({"id": id, "title": "B"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Successfully updated task");

        let (status, body) = send(&app, "GET", &format!("/main/tasks/{id}"), Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["title"], "B");

        let (status, text) = send(&app, "DELETE", &format!("/main/task/{id}"), Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Deleted task");

        let (status, _) = send(&app, "GET", &format!("/main/tasks/{id}"), Some("ann"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn browser_timestamps_are_stored_as_dates() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;

        let task = json!({
            "id": 0,
            "title": "A",
            "startDate": "2024-06-30T00:00:00.000Z",
            "dueDate": "2024-07-01T00:00:00.000Z",
            "startTime": "09:30",
            "priority": false,
        });
        let (status, text) = send(&app, "POST", "/main/add", Some("ann"), Some(task)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Added task successfully");

        let (_, body) = send(&app, "GET", "/main/tasks", Some("ann"), None).await;
        let tasks = json_of(&body);
        assert_eq!(tasks[0]["startDate"], "2024-06-30");
        assert_eq!(tasks[0]["dueDate"], "2024-07-01");
        let id = tasks[0]["id"].as_i64().unwrap();

        let edit = json!({"id": id, "title": "A", "dueDate": "2024-08-15T00:00:00.000Z"});
        let (status, _) = send(&app, "PUT", "/main/tasks/update", Some("ann"), Some(edit)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, "GET", &format!("/main/tasks/{id}"), Some("ann"), None).await;
        assert_eq!(json_of(&body)["dueDate"], "2024-08-15");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_complete() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;
        signup(&app, "bob").await;

        let (a, b, c) = tokio::join!(
            send(&app, "POST", "/main/add", Some("ann"), Some(json!({"title": "A"}))),
            send(&app, "POST", "/main/add", Some("bob"), Some(json!({"title": "B"}))),
            send(&app, "GET", "/main/tasks", Some("ann"), None),
        );
        assert_eq!(a.0, StatusCode::OK);
        assert_eq!(b.0, StatusCode::OK);
        assert_eq!(c.0, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/main/tasks", Some("bob"), None).await;
        assert_eq!(json_of(&body)[0]["title"], "B");
    }

    #[tokio::test]
    async fn other_users_task_is_not_found() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;
        signup(&app, "bob").await;
        send(&app, "POST", "/main/add", Some("ann"), Some(json!({"title": "A"}))).await;

        let (_, body) = send(&app, "GET", "/main/tasks", Some("bob"), None).await;
        assert_eq!(json_of(&body), json!([]));
        let (status, _) = send(&app, "GET", "/main/tasks/1", Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn legacy_delete_ignores_owner() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;
        signup(&app, "bob").await;
        send(&app, "POST", "/main/add", Some("ann"), Some(json!({"title": "A"}))).await;

        let (status, _) = send(&app, "DELETE", "/main/task/1", Some("bob"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/main/tasks/1", Some("ann"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn owner_delete_keeps_foreign_task() {
        let app = app(Scoping::Owner);
        signup(&app, "ann").await;
        signup(&app, "bob").await;
        send(&app, "POST", "/main/add", Some("ann"), Some(json!({"title": "A"}))).await;

        let (status, _) = send(&app, "DELETE", "/main/task/1", Some("bob"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/main/tasks/1", Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn owner_update_of_foreign_task_is_not_found() {
        let app = app(Scoping::Owner);
        signup(&app, "ann").await;
        signup(&app, "bob").await;
        send(&app, "POST", "/main/add", Some("ann"), Some(json!({"title": "A"}))).await;

        let (status, _) = send(
            &app,
            "PUT",
            "/main/tasks/update",
            Some("bob"),
            Some(json!({"id": 1, "title": "mine"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&app, "GET", "/main/tasks/1", Some("ann"), None).await;
        assert_eq!(json_of(&body)["title"], "A");
    }

    #[tokio::test]
    async fn subtask_parent_comes_from_path() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;

        let (status, text) = send(
            &app,
            "POST",
            "/main/5/add/subtask",
            Some("ann"),
            Some(json!({"title": "S", "parentTaskID": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Added task successfully");

        let (status, body) = send(&app, "GET", "/main/5/subtasks", Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
        let subs = json_of(&body);
        assert_eq!(subs[0]["parentTaskID"], 5);
        assert_eq!(subs[0]["title"], "S");
        let id = subs[0]["id"].as_i64().unwrap();

        let (status, body) =
            send(&app, "GET", &format!("/main/subtasks/{id}"), Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["parentTaskID"], 5);

        let (status, text) = send(
            &app,
            "PUT",
            "/main/subtasks/update",
            Some("ann"),
            Some(json!({"id": id, "parentTaskID": 5, "title": "T", "completed": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Successfully updated task");
        let (_, body) = send(&app, "GET", &format!("/main/subtasks/{id}"), Some("ann"), None).await;
        assert_eq!(json_of(&body)["title"], "T");
        assert_eq!(json_of(&body)["completed"], true);

        let (status, text) =
            send(&app, "DELETE", &format!("/main/subtasks/{id}"), Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, b"Deleted task");
        let (status, _) = send(&app, "GET", &format!("/main/subtasks/{id}"), Some("ann"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn subtask_reads_follow_scoping() {
        for (scoping, visible_to_bob) in [(Scoping::Legacy, 1), (Scoping::Owner, 0)] {
            let app = app(scoping);
            signup(&app, "ann").await;
            signup(&app, "bob").await;
            send(&app, "POST", "/main/3/add/subtask", Some("ann"), Some(json!({"title": "S"}))).await;

            let (_, body) = send(&app, "GET", "/main/subtasks", Some("bob"), None).await;
            assert_eq!(json_of(&body).as_array().unwrap().len(), visible_to_bob);
            let (_, body) = send(&app, "GET", "/main/3/subtasks", Some("bob"), None).await;
            assert_eq!(json_of(&body).as_array().unwrap().len(), visible_to_bob);
            let (status, _) = send(&app, "GET", "/main/subtasks/1", Some("bob"), None).await;
            let expected = if visible_to_bob == 1 {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            };
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn delete_missing_ids_succeeds() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;
        let (status, _) = send(&app, "DELETE", "/main/task/99", Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", "/main/subtasks/99", Some("ann"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn credentials_are_required() {
        let app = app(Scoping::Legacy);
        signup(&app, "ann").await;

        let (status, _) = send(&app, "GET", "/main/tasks", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "GET", "/main/tasks", Some("nobody"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/main/tasks")
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode("ann:wrong")),
            )
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn register_without_password_is_bad_request() {
        let app = app(Scoping::Legacy);
        let (status, _) = send(
            &app,
            "POST",
            "/main/register",
            None,
            Some(json!({"username": "ann"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let app = app(Scoping::Legacy);
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/main/tasks")
            .header(header::ORIGIN, "http://elsewhere.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }
}
