//! Router-level integration tests: REST surface wired to a real (in-memory)
//! store, a live hub, and a fallback-only agent runner.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crewroom::agents::runner::AgentRunner;
use crewroom::api::AppState;
use crewroom::db::{Db, DbHandle, NewDialog};
use crewroom::hub::Hub;
use crewroom::server::build_router;

fn test_state(projects_root: &Path) -> Arc<AppState> {
    let db = DbHandle::new(Db::new_in_memory().unwrap());
    let hub = Arc::new(Hub::new());
    let runner = Arc::new(AgentRunner::new(
        db.clone(),
        hub.clone(),
        None,
        projects_root.to_path_buf(),
    ));
    Arc::new(AppState {
        db,
        hub,
        runner,
        gateway: None,
        projects_root: projects_root.to_path_buf(),
    })
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_project(app: &axum::Router, name: &str) -> i64 {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/projects",
            serde_json::json!({"name": name}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn project_creation_provisions_a_git_workspace() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/projects",
            serde_json::json!({"name": "demo", "description": "a demo"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let id = body["id"].as_i64().unwrap();
    let workspace = body["workspacePath"].as_str().unwrap();
    assert!(workspace.ends_with(&id.to_string()));
    assert!(Path::new(workspace).join(".git").exists());

    let response = app
        .oneshot(Request::builder().uri("/api/projects").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    let projects = body["projects"].as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["name"], "demo");
    assert_eq!(projects[0]["settings"]["repoType"], "init");
}

#[tokio::test]
async fn clone_without_url_is_a_bad_request() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/projects",
            serde_json::json!({"name": "demo", "repo_option": "clone"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blank_project_name_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/projects",
            serde_json::json!({"name": "   "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn todo_issue_is_routed_and_queued_by_keywords() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));
    let project_id = create_project(&app, "demo").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/issues",
            serde_json::json!({
                "project_id": project_id,
                "title": "please build the backend and database layer",
                "status": "todo",
                "priority": "high",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/issues?project_id={}", project_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    let issue = &body["issues"][0];
    assert_eq!(issue["status"], "todo");
    assert_eq!(issue["assignedAgentId"], "backend_architect");
    assert_eq!(issue["queuedAgentId"], "backend_architect");
    assert!(issue["queuedAt"].is_string());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/agent-queues?project_id={}", project_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    let queues = body["queues"].as_array().unwrap();
    assert_eq!(queues.len(), 5);
    let backend = queues
        .iter()
        .find(|q| q["agent_id"] == "backend_architect")
        .unwrap();
    assert_eq!(backend["queue_depth"], 1);
    assert_eq!(backend["status"], "queued");
}

#[tokio::test]
async fn status_updates_stamp_and_clear_lifecycle_fields() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));
    let project_id = create_project(&app, "demo").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/issues",
            serde_json::json!({
                "project_id": project_id,
                "title": "API schema",
                "status": "todo",
            }),
        ))
        .await
        .unwrap();
    let issue_id = json_body(response).await["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/issues/{}/status", issue_id),
            serde_json::json!({"status": "inProgress"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/issues/{}/status", issue_id),
            serde_json::json!({"status": "done"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/issues?project_id={}", project_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    let issue = &body["issues"][0];
    assert_eq!(issue["status"], "done");
    assert!(issue["startedAt"].is_string());
    assert!(issue["completedAt"].is_string());
    assert!(issue.get("queuedAgentId").is_none());
}

#[tokio::test]
async fn repeating_a_status_update_leaves_the_issue_identical() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));
    let project_id = create_project(&app, "demo").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/issues",
            serde_json::json!({
                "project_id": project_id,
                "title": "tune the backend cache",
                "status": "todo",
            }),
        ))
        .await
        .unwrap();
    let issue_id = json_body(response).await["id"].as_i64().unwrap();

    let fetch_issue = |app: axum::Router| async move {
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/issues?project_id={}", project_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        json_body(response).await["issues"][0].clone()
    };

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/issues/{}/status", issue_id),
            serde_json::json!({"status": "todo"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = fetch_issue(app.clone()).await;
    assert_eq!(first["queuedAgentId"], "backend_architect");
    let first_queued_at = first["queuedAt"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/issues/{}/status", issue_id),
            serde_json::json!({"status": "todo"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second = fetch_issue(app.clone()).await;

    assert_eq!(second["queuedAt"].as_str().unwrap(), first_queued_at);
    assert_eq!(first, second);
}

#[tokio::test]
async fn invalid_enum_values_are_bad_requests() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));
    let project_id = create_project(&app, "demo").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/issues",
            serde_json::json!({
                "project_id": project_id,
                "title": "t",
                "priority": "critical",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/issues",
            serde_json::json!({
                "project_id": project_id,
                "title": "t",
                "status": "in_progress",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/issues/999/status",
            serde_json::json!({"status": "archived"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_an_issue_twice_returns_not_found() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));
    let project_id = create_project(&app, "demo").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/issues",
            serde_json::json!({"project_id": project_id, "title": "t"}),
        ))
        .await
        .unwrap();
    let issue_id = json_body(response).await["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/issues/{}", issue_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/issues/{}", issue_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dialog_round_trip_resolves_once() {
    let root = tempfile::tempdir().unwrap();
    let state = test_state(root.path());
    let app = build_router(state.clone());
    let project_id = create_project(&app, "demo").await;

    let dialog = state
        .db
        .call(move |db| {
            db.create_dialog(&NewDialog {
                project_id,
                agent_id: "backend_architect".to_string(),
                issue_id: None,
                title: "Authentication Method".to_string(),
                message: "Which method should we use?".to_string(),
                options: vec!["A".to_string(), "B".to_string()],
                default_option: "A".to_string(),
            })
        })
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/dialogs/{}/respond", dialog.id),
            serde_json::json!({"selected_option": "B", "user_id": "u1", "user_name": "Dana"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["selectedOption"], "B");
    assert_eq!(body["respondedBy"], "u1");
    assert_eq!(body["respondedByName"], "Dana");

    // Second resolve attempt: the dialog is no longer open.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/dialogs/{}/respond", dialog.id),
            serde_json::json!({"selected_option": "A", "user_id": "u2"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "dialog already resolved");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/dialogs?project_id={}", project_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["dialogs"][0]["status"], "resolved");
    assert_eq!(body["dialogs"][0]["selectedOption"], "B");
}

#[tokio::test]
async fn unknown_dialog_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/dialogs/404/respond",
            serde_json::json!({"selected_option": "A"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn coach_works_offline() {
    let root = tempfile::tempdir().unwrap();
    let app = build_router(test_state(root.path()));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/coach",
            serde_json::json!({"prompt": "make it better"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["improved_prompt"], "make it better");

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/coach",
            serde_json::json!({"prompt": "  "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
