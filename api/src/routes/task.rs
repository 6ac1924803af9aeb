use actix_web::{get, post, put, web, HttpResponse};
use chrono::Utc;
use common::models::NewTask;
use game::{tasks, TaskType};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::required;
use crate::{
    error::{ApiError, ApiResult},
    metrics,
    state::AppState,
};

const DEFAULT_REWARD: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    user_id: Option<String>,
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    name: String,
    description: String,
    score_reward: Option<i64>,
    #[serde(rename = "type")]
    task_type: TaskType,
    task_key: String,
}

#[get("/task")]
pub async fn list_user_tasks(
    query: web::Query<TasksQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = required(query.user_id.as_deref(), "User ID is required")?;
    let user_tasks = state.store.list_user_tasks(user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "userTasks": user_tasks })))
}

#[post("/task")]
pub async fn complete_task(
    req: web::Json<CompleteTaskRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = required(req.user_id.as_deref(), "User ID and Task ID are required")?;
    let task_id = required(req.task_id.as_deref(), "User ID and Task ID are required")?;

    let user_task = state
        .store
        .get_user_task(user_id, task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User task"))?;
    let task = user_task
        .task
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Task"))?;

    let now = Utc::now();
    let guard = tasks::check_completion(task.task_type, user_task.progress(), now)?;
    let (task_type, reward) = (task.task_type, task.score_reward);

    let user_task = state
        .store
        .complete_user_task(user_id, task_id, guard, reward, now)
        .await?
        .ok_or_else(|| ApiError::not_found("User task"))?;
    info!(
        "User {} completed task {} (+{})",
        user_id, task_id, reward
    );
    metrics::record_task_completed(task_type.as_str());

    Ok(HttpResponse::Ok().json(json!({ "userTask": user_task })))
}

#[put("/task")]
pub async fn create_task(
    req: web::Json<CreateTaskRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let req = req.into_inner();
    if req.name.trim().is_empty() || req.task_key.trim().is_empty() {
        return Err(ApiError::bad_request("Task name and task_key are required"));
    }
    let score_reward = req.score_reward.unwrap_or(DEFAULT_REWARD);
    if score_reward < 0 {
        return Err(ApiError::bad_request("score_reward cannot be negative"));
    }

    if state.store.find_task_by_key(&req.task_key).await?.is_some() {
        return Err(ApiError::bad_request(
            "Task with this task_key already exists",
        ));
    }

    let task = state
        .store
        .create_task(NewTask {
            name: req.name,
            description: req.description,
            score_reward,
            task_type: req.task_type,
            task_key: req.task_key,
        })
        .await?;
    info!("Created task {} ({})", task.task_key, task.task_type);

    Ok(HttpResponse::Ok().json(json!({ "task": task })))
}
