//! Task CRUD handlers. All of them sit behind the auth stage; the
//! principal scopes every query, so one user can never see or touch
//! another user's tasks.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::AuthenticatedPrincipal;
use crate::storage::{NewTask, TaskFilter, TaskPatch, TaskPriority, TaskRecord, TaskStatus};

use super::{ApiError, AppState};

/// Upper bound on page size, to keep a single listing bounded.
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub status: Option<TaskStatus>,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(task: TaskRecord) -> Self {
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            status: task.status,
            priority: task.priority,
            user_id: task.user_id,
            created_at: task.created_at,
            updated_at: task.updated_at,
            completed_at: task.completed_at,
        }
    }
}

/// `POST /api/v1/tasks` (protected)
pub async fn create_task_handler(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::Invalid("title must not be empty"));
    }

    let task = state
        .storage
        .create_task(NewTask {
            user_id: principal.user_id,
            title: body.title,
            description: body.description,
            priority: body.priority,
        })
        .await?;

    info!(task_id = task.id, user_id = principal.user_id, "task created");
    Ok((StatusCode::CREATED, Json(task.into())))
}

/// `GET /api/v1/tasks` (protected)
pub async fn list_tasks_handler(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskResponse>>, ApiError> {
    let tasks = state
        .storage
        .list_tasks(
            principal.user_id,
            TaskFilter {
                status: query.status,
                skip: query.skip,
                limit: query.limit.min(MAX_PAGE_SIZE),
            },
        )
        .await?;

    info!(
        user_id = principal.user_id,
        count = tasks.len(),
        "tasks listed"
    );
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}

/// `GET /api/v1/tasks/{id}` (protected)
pub async fn get_task_handler(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(task_id): Path<u64>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state
        .storage
        .get_task(principal.user_id, task_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(task.into()))
}

/// `PUT /api/v1/tasks/{id}` (protected)
pub async fn update_task_handler(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(task_id): Path<u64>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::Invalid("title must not be empty"));
    }

    let task = state
        .storage
        .update_task(
            principal.user_id,
            task_id,
            TaskPatch {
                title: body.title,
                description: body.description,
                status: body.status,
                priority: body.priority,
            },
        )
        .await?
        .ok_or(ApiError::NotFound)?;

    info!(task_id, user_id = principal.user_id, "task updated");
    Ok(Json(task.into()))
}

/// `DELETE /api/v1/tasks/{id}` (protected)
pub async fn delete_task_handler(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(task_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    if !state.storage.delete_task(principal.user_id, task_id).await? {
        return Err(ApiError::NotFound);
    }
    info!(task_id, user_id = principal.user_id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}
