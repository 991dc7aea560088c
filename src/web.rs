//! HTTP 接口（feature = "web"）
//!
//! - `POST /task` `{ "query": "..." }` -> `{ success, task_id, status, query }`
//! - `GET /task/:task_id` -> 进行中返回 `{ task_id, status }`；失败附带 `error`；完成附带持久化结果（记录缺失时 404）
//! - `GET /health` -> `OK`

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::gateway::TaskGateway;
use crate::task::{TaskId, TaskStatus};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub query: String,
}

/// GET /task/:task_id 的响应；字段随状态出现
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

type ApiError = (StatusCode, String);

pub fn router(gateway: Arc<TaskGateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/task", post(create_task))
        .route("/task/:task_id", get(get_task))
        .with_state(gateway)
}

async fn health() -> &'static str {
    "OK"
}

async fn create_task(
    State(gateway): State<Arc<TaskGateway>>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    let Json(req) = body.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    let query = req
        .query
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "query is required".to_string()))?;

    let created = gateway.create_task(&query).await.map_err(api_error)?;
    Ok(Json(CreateTaskResponse {
        success: true,
        task_id: created.task_id,
        status: created.status,
        query,
    }))
}

async fn get_task(
    State(gateway): State<Arc<TaskGateway>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let task = gateway.get_task(&task_id).await.map_err(api_error)?;
    let mut view = TaskView {
        task_id: task.id.clone(),
        status: task.status,
        error: None,
        query: None,
        source_reference: None,
        content: None,
    };

    match task.status {
        TaskStatus::Error => view.error = task.error_detail,
        TaskStatus::Done => {
            let record = gateway
                .find_record(&task_id)
                .await
                .map_err(api_error)?
                .ok_or_else(|| (StatusCode::NOT_FOUND, "Task result not found in database".to_string()))?;
            view.query = Some(record.query);
            view.source_reference = Some(record.source_reference);
            view.content = Some(record.content);
        }
        _ => {}
    }
    Ok(Json(view))
}

fn api_error(e: PipelineError) -> ApiError {
    let status = match &e {
        PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::NotReady { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
