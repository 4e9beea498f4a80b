//! REST surface of the workspace server.
//!
//! The handlers here are a thin translation layer: they validate input, call
//! into the store, fan events out through the hub, and hand conversational
//! work to the agent runner. Authentication is the deployment's concern; the
//! transport passes `user_id`/`user_name` through where the core needs them.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;

use crate::agents::detector::determine_issue_agent;
use crate::agents::runner::AgentRunner;
use crate::coach;
use crate::db::{DbHandle, NewIssue};
use crate::dispatch::push_agent_snapshots;
use crate::errors::CoreError;
use crate::events::{DialogResolution, Event};
use crate::gateway::ModelGateway;
use crate::hub::Hub;
use crate::models::{DialogStatus, IssueStatus, Priority, SenderType};
use crate::workspace;
use crate::ws;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub hub: Arc<Hub>,
    pub runner: Arc<AgentRunner>,
    pub gateway: Option<Arc<dyn ModelGateway>>,
    pub projects_root: PathBuf,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub repo_option: Option<String>,
    pub repo_url: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateIssueRequest {
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub assigned_agent_id: Option<String>,
    pub created_by: Option<String>,
    pub created_by_type: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateIssueStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct RespondDialogRequest {
    pub selected_option: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Deserialize)]
pub struct CoachRequest {
    pub prompt: String,
}

#[derive(Deserialize)]
pub struct ProjectScope {
    pub project_id: i64,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DialogNotFound(_) => ApiError::NotFound(err.to_string()),
            _ if err.is_bad_request() => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/issues", get(list_issues).post(create_issue))
        .route("/api/issues/:id/status", put(update_issue_status))
        .route("/api/issues/:id", axum::routing::delete(delete_issue))
        .route("/api/dialogs", get(list_dialogs))
        .route("/api/dialogs/:id/respond", post(respond_dialog))
        .route("/api/agent-queues", get(agent_queues))
        .route("/api/agent-status", get(agent_status))
        .route("/api/coach", post(coach_prompt))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let projects = state.db.call(|db| db.list_projects()).await?;
    Ok(Json(serde_json::json!({"projects": projects})))
}

async fn create_project(
    State(state): State<SharedState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Project name is required".to_string()));
    }
    let description = req.description.unwrap_or_default();

    let project = state
        .db
        .call(move |db| db.create_project(&name, &description))
        .await?;

    let settings = workspace::setup_project_workspace(
        &state.projects_root,
        project.id,
        req.repo_option.as_deref(),
        req.repo_url.as_deref(),
    )
    .await
    .map_err(|e| match e {
        e if e.is_bad_request() => ApiError::BadRequest(format!("Workspace error: {}", e)),
        e => ApiError::Internal(format!("Workspace error: {}", e)),
    })?;

    let project_id = project.id;
    let to_save = settings.clone();
    if let Err(e) = state
        .db
        .call(move |db| db.save_settings(project_id, &to_save))
        .await
    {
        eprintln!(
            "[workspace] failed to save settings for project {}: {:#}",
            project_id, e
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": project.id,
            "workspacePath": settings.workspace_path,
        })),
    ))
}

async fn list_issues(
    State(state): State<SharedState>,
    Query(scope): Query<ProjectScope>,
) -> Result<impl IntoResponse, ApiError> {
    let issues = state
        .db
        .call(move |db| db.list_issues(scope.project_id))
        .await?;
    Ok(Json(serde_json::json!({"issues": issues})))
}

async fn create_issue(
    State(state): State<SharedState>,
    Json(req): Json<CreateIssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let priority = match req.priority.as_deref() {
        Some(p) if !p.is_empty() => Priority::from_str(p).map_err(ApiError::BadRequest)?,
        _ => Priority::Medium,
    };
    let status = match req.status.as_deref() {
        Some(s) if !s.is_empty() => IssueStatus::from_str(s).map_err(ApiError::BadRequest)?,
        _ => IssueStatus::Proposed,
    };
    let created_by_type = match req.created_by_type.as_deref() {
        Some(t) if !t.is_empty() => SenderType::from_str(t).map_err(ApiError::BadRequest)?,
        _ => SenderType::User,
    };

    let description = req.description.unwrap_or_default();
    let agent = determine_issue_agent(req.assigned_agent_id.as_deref(), &req.title, &description);
    let queued = status == IssueStatus::Todo && agent.is_some();

    let new_issue = NewIssue {
        project_id: req.project_id,
        title: req.title,
        description,
        priority,
        status,
        created_by: req.created_by.unwrap_or_default(),
        created_by_type,
        assigned_agent_id: agent.clone(),
        queued_agent_id: if queued { agent } else { None },
        tags: None,
    };
    let issue = state.db.call(move |db| db.create_issue(&new_issue)).await?;

    if queued {
        push_agent_snapshots(&state.db, &state.hub, issue.project_id).await;
    }
    let id = issue.id;
    state.hub.broadcast(&Event::IssueUpdated { issue });

    Ok(Json(serde_json::json!({"id": id})))
}

async fn update_issue_status(
    State(state): State<SharedState>,
    Path(issue_id): Path<i64>,
    Json(req): Json<UpdateIssueStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.status.is_empty() {
        return Err(ApiError::BadRequest("status is required".to_string()));
    }
    let status = IssueStatus::from_str(&req.status).map_err(ApiError::BadRequest)?;

    let issue = state
        .db
        .call(move |db| db.get_issue(issue_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("issue not found".to_string()))?;

    state
        .db
        .call(move |db| db.update_issue_status(issue_id, status).map(|_| ()))
        .await?;

    if status == IssueStatus::Todo {
        let agent = match issue.assigned_agent_id.clone() {
            Some(agent) => Some(agent),
            None => determine_issue_agent(None, &issue.title, &issue.description),
        };
        if let Some(agent) = agent {
            if issue.assigned_agent_id.is_none() {
                let assign = agent.clone();
                if let Err(e) = state
                    .db
                    .call(move |db| db.set_assigned_agent(issue_id, &assign))
                    .await
                {
                    eprintln!("[issue] failed to assign agent for {}: {:#}", issue_id, e);
                }
            }
            let queue_to = agent.clone();
            if let Err(e) = state
                .db
                .call(move |db| db.queue_issue(issue_id, &queue_to))
                .await
            {
                eprintln!("[issue] failed to queue {}: {:#}", issue_id, e);
            }
        }
    }

    if let Some(fresh) = state.db.call(move |db| db.get_issue(issue_id)).await? {
        state.hub.broadcast(&Event::IssueUpdated { issue: fresh });
    }
    push_agent_snapshots(&state.db, &state.hub, issue.project_id).await;

    Ok(StatusCode::OK)
}

async fn delete_issue(
    State(state): State<SharedState>,
    Path(issue_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.db.call(move |db| db.delete_issue(issue_id)).await?;
    if !deleted {
        return Err(ApiError::NotFound("issue not found".to_string()));
    }
    Ok(StatusCode::OK)
}

async fn list_dialogs(
    State(state): State<SharedState>,
    Query(scope): Query<ProjectScope>,
) -> Result<impl IntoResponse, ApiError> {
    let dialogs = state
        .db
        .call(move |db| db.list_dialogs(scope.project_id))
        .await?;
    Ok(Json(serde_json::json!({"dialogs": dialogs})))
}

async fn respond_dialog(
    State(state): State<SharedState>,
    Path(dialog_id): Path<i64>,
    Json(req): Json<RespondDialogRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolution = resolve_dialog(
        &state,
        dialog_id,
        req.user_id.unwrap_or_else(|| "anonymous".to_string()),
        req.user_name,
        req.selected_option.unwrap_or_default(),
    )
    .await?;
    Ok(Json(resolution))
}

async fn agent_queues(
    State(state): State<SharedState>,
    Query(scope): Query<ProjectScope>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .db
        .call(move |db| db.collect_queue_stats(scope.project_id))
        .await?;
    Ok(Json(serde_json::json!({"queues": stats})))
}

async fn agent_status(
    State(state): State<SharedState>,
    Query(scope): Query<ProjectScope>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .db
        .call(move |db| db.collect_queue_stats(scope.project_id))
        .await?;
    Ok(Json(serde_json::json!({"statuses": stats})))
}

async fn coach_prompt(
    State(state): State<SharedState>,
    Json(req): Json<CoachRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = coach::improve_prompt(state.gateway.as_ref(), &req.prompt).await?;
    Ok(Json(result))
}

// ── Dialog resolution ─────────────────────────────────────────────────

/// Resolve an open dialog: validate the selection, flip the row with a
/// conditional update (a lost race surfaces as "already resolved"), emit
/// `dialog.responded`, and post a system chat message describing the choice.
pub async fn resolve_dialog(
    state: &AppState,
    dialog_id: i64,
    user_id: String,
    user_name: Option<String>,
    selected: String,
) -> Result<DialogResolution, CoreError> {
    let dialog = state
        .db
        .call(move |db| db.get_dialog(dialog_id))
        .await?
        .ok_or(CoreError::DialogNotFound(dialog_id))?;

    if dialog.status != DialogStatus::Open {
        return Err(CoreError::DialogAlreadyResolved);
    }

    let choice = dialog.choose_option(&selected)?;

    let (to_store, responder) = (choice.clone(), user_id.clone());
    let updated = state
        .db
        .call(move |db| db.resolve_dialog(dialog_id, &to_store, &responder))
        .await?;
    if !updated {
        // Another responder won the conditional update.
        return Err(CoreError::DialogAlreadyResolved);
    }

    let fresh = state
        .db
        .call(move |db| db.get_dialog(dialog_id))
        .await?
        .ok_or(CoreError::DialogNotFound(dialog_id))?;

    let responded_by_name = user_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "A teammate".to_string());

    let resolution = DialogResolution {
        id: dialog.id,
        project_id: dialog.project_id,
        agent_id: dialog.agent_id.clone(),
        title: dialog.title.clone(),
        message: dialog.message.clone(),
        selected_option: choice.clone(),
        responded_by: user_id,
        responded_by_name: Some(responded_by_name.clone()),
        responded_at: fresh.responded_at.unwrap_or_default(),
        issue_id: dialog.issue_id,
    };

    state.hub.broadcast(&Event::DialogResponded {
        dialog: resolution.clone(),
    });

    let summary = format!(
        "{} selected '{}' for dialog '{}'.",
        responded_by_name, choice, dialog.title
    );
    ws::send_system_message(&state.db, &state.hub, dialog.project_id, &summary).await;

    Ok(resolution)
}
