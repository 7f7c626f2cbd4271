use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use httpmock::prelude::*;
use opencorps::adapters::github::GithubEndpoint;
use opencorps::adapters::storage::{FileStore, InMemoryStore};
use opencorps::api::{create_router, AppState};
use opencorps::core::dispatcher::JobQueue;
use opencorps::core::webhook::sign;
use opencorps::domain::model::{Job, JobState, Project, ProjectId, RunResult, TestSummary};
use opencorps::domain::ports::ResultStore;
use opencorps::{Result, Tracker, TrackerError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "s3cret";
const SHA: &str = "6dcb09b5b57875f334f61aebed695e2e4193db5e";

const PROJECT_YAML: &str = r#"
branches: [master]
workflows:
  - name: sim
    tool: cocotb
    workdir: tests
  - name: synth
    tool: yosys
    target: synth.ys
notify:
  email: [dev@example.org]
  on: change
"#;

struct RecordingQueue {
    jobs: Mutex<Vec<Job>>,
    capacity: usize,
}

impl RecordingQueue {
    fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl JobQueue for RecordingQueue {
    fn enqueue(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.len() >= self.capacity {
            return Err(TrackerError::QueueFull {
                capacity: self.capacity,
            });
        }
        jobs.push(job);
        Ok(())
    }
}

struct TestApp {
    router: Router,
    store: Arc<InMemoryStore>,
    queue: Arc<RecordingQueue>,
}

fn test_app(github_url: &str, token: Option<&str>, secret: Option<&str>, capacity: usize) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(RecordingQueue::new(capacity));
    let tracker = Tracker::new(
        Arc::new(GithubEndpoint::new(github_url, token.map(str::to_string))),
        store.clone(),
        Vec::new(),
        queue.clone(),
        "https://ci.example.org/webhooks/github".to_string(),
        secret.map(str::to_string),
    );
    TestApp {
        router: create_router(AppState::new(Arc::new(tracker))),
        store,
        queue,
    }
}

fn store_app(store: Arc<dyn ResultStore>, github_url: &str) -> Router {
    let tracker = Tracker::new(
        Arc::new(GithubEndpoint::new(github_url, None)),
        store,
        Vec::new(),
        Arc::new(RecordingQueue::new(10)),
        "https://ci.example.org/webhooks/github".to_string(),
        None,
    );
    create_router(AppState::new(Arc::new(tracker)))
}

fn push_payload(git_ref: &str) -> Vec<u8> {
    json!({
        "ref": git_ref,
        "after": SHA,
        "deleted": false,
        "repository": {
            "name": "uart",
            "full_name": "acme/uart",
            "owner": { "name": "acme" },
            "clone_url": "https://github.com/acme/uart.git",
            "default_branch": "master"
        },
        "head_commit": {
            "message": "Add FIFO",
            "timestamp": "2016-05-05T19:40:15-04:00",
            "author": { "name": "Dev", "email": "dev@example.org" }
        },
        "pusher": { "name": "dev" }
    })
    .to_string()
    .into_bytes()
}

fn webhook_request(event: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/github")
        .header("content-type", "application/json")
        .header("X-GitHub-Event", event)
        .header("X-GitHub-Delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958");
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature-256", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn mock_project_config(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/acme/uart/contents/.opencorps.yml")
                .query_param("ref", SHA);
            then.status(200).json_body(json!({
                "encoding": "base64",
                "content": STANDARD.encode(PROJECT_YAML),
            }));
        })
        .await;
}

#[tokio::test]
async fn test_health() {
    let app = test_app("http://127.0.0.1:9", None, None, 10);
    let (status, body) = get_json(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ping() {
    let app = test_app("http://127.0.0.1:9", None, Some(SECRET), 10);
    let body = b"{\"zen\":\"Keep it logically awesome.\"}".to_vec();
    let signature = sign(SECRET, &body).unwrap();

    let (status, body) = send(&app.router, webhook_request("ping", body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "pong");
}

#[tokio::test]
async fn test_rejects_bad_signature() {
    let app = test_app("http://127.0.0.1:9", None, Some(SECRET), 10);
    let body = push_payload("refs/heads/master");
    let signature = sign("wrong", &body).unwrap();

    let (status, _) = send(&app.router, webhook_request("push", body.clone(), Some(signature))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app.router, webhook_request("push", body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.queue.len(), 0);
}

#[tokio::test]
async fn test_push_queues_one_job_per_workflow() {
    let server = MockServer::start_async().await;
    mock_project_config(&server).await;
    let app = test_app(&server.base_url(), None, Some(SECRET), 10);

    let body = push_payload("refs/heads/master");
    let signature = sign(SECRET, &body).unwrap();
    let (status, body) = send(&app.router, webhook_request("push", body, Some(signature))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "queued");
    assert_eq!(body["jobs"].as_array().unwrap().len(), 2);
    assert_eq!(app.queue.len(), 2);

    let project = ProjectId::new("acme", "uart");
    assert!(app.store.get_project(&project).await.unwrap().is_some());
    let jobs = app.store.jobs_for_commit(&project, SHA).await.unwrap();
    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.commit.branch, "master");
        assert_eq!(job.notify.email, vec!["dev@example.org".to_string()]);
    }

    let (status, body) = get_json(
        &app.router,
        &format!("/api/v1/projects/acme/uart/commits/{}", SHA),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_push_to_unconfigured_branch_is_ignored() {
    let server = MockServer::start_async().await;
    mock_project_config(&server).await;
    let app = test_app(&server.base_url(), None, None, 10);

    let (status, body) = send(
        &app.router,
        webhook_request("push", push_payload("refs/heads/feature/fifo"), None),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ignored");
    assert_eq!(app.queue.len(), 0);
}

#[tokio::test]
async fn test_push_without_project_config_is_ignored() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart/contents/.opencorps.yml");
            then.status(404);
        })
        .await;
    let app = test_app(&server.base_url(), None, None, 10);

    let (status, body) = send(
        &app.router,
        webhook_request("push", push_payload("refs/heads/master"), None),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["reason"], "no .opencorps.yml");
}

#[tokio::test]
async fn test_tag_push_and_other_events_are_ignored() {
    let app = test_app("http://127.0.0.1:9", None, None, 10);

    let (status, _) = send(
        &app.router,
        webhook_request("push", push_payload("refs/tags/v1.0"), None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app.router, webhook_request("issues", b"{}".to_vec(), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn test_malformed_push_is_bad_request() {
    let app = test_app("http://127.0.0.1:9", None, None, 10);
    let (status, body) = send(&app.router, webhook_request("push", b"nope".to_vec(), None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("malformed"));
}

#[tokio::test]
async fn test_full_queue_is_service_unavailable() {
    let server = MockServer::start_async().await;
    mock_project_config(&server).await;
    let app = test_app(&server.base_url(), None, None, 1);

    let (status, _) = send(
        &app.router,
        webhook_request("push", push_payload("refs/heads/master"), None),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let jobs = app
        .store
        .jobs_for_commit(&ProjectId::new("acme", "uart"), SHA)
        .await
        .unwrap();
    assert_eq!(
        jobs.iter().filter(|j| j.state == JobState::Errored).count(),
        1
    );
}

#[tokio::test]
async fn test_register_project_installs_webhook() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart");
            then.status(200).json_body(json!({
                "full_name": "acme/uart",
                "clone_url": "https://github.com/acme/uart.git",
                "default_branch": "master",
            }));
        })
        .await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/repos/acme/uart/hooks");
            then.status(201).json_body(json!({ "id": 7 }));
        })
        .await;
    let app = test_app(&server.base_url(), Some("t0ken"), Some(SECRET), 10);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/projects")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "repository": "acme/uart" }).to_string()))
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["webhook_installed"], true);
    hook.assert_async().await;

    let (status, body) = get_json(&app.router, "/api/v1/projects").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_rejects_bad_repository_name() {
    let app = test_app("http://127.0.0.1:9", None, None, 10);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/projects")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "repository": "not-a-repo" }).to_string()))
        .unwrap();

    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_build_of_missing_branch_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart/git/refs/heads/nope");
            then.status(404);
        })
        .await;
    let app = test_app(&server.base_url(), None, None, 10);
    app.store
        .upsert_project(Project {
            id: ProjectId::new("acme", "uart"),
            clone_url: "https://github.com/acme/uart.git".to_string(),
            default_branch: "master".to_string(),
            registered_at: chrono::Utc::now(),
            webhook_installed: false,
        })
        .await
        .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/projects/acme/uart/builds")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "branch": "nope" }).to_string()))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn seed_finished_job(store: &InMemoryStore, state: JobState) -> Job {
    let project = Project {
        id: ProjectId::new("acme", "uart"),
        clone_url: "https://github.com/acme/uart.git".to_string(),
        default_branch: "master".to_string(),
        registered_at: chrono::Utc::now(),
        webhook_installed: true,
    };
    store.upsert_project(project).await.unwrap();

    let config = opencorps::ProjectConfig::from_yaml_str(PROJECT_YAML).unwrap();
    let mut job = Job::new(
        ProjectId::new("acme", "uart"),
        "https://github.com/acme/uart.git",
        opencorps::domain::model::Commit {
            sha: SHA.to_string(),
            branch: "master".to_string(),
            message: "Add FIFO".to_string(),
            author: "Dev".to_string(),
            timestamp: chrono::Utc::now(),
        },
        config.workflows[0].clone(),
    );
    job.mark_running();
    job.finish(
        state,
        RunResult {
            exit_code: Some(0),
            duration_secs: 12,
            tests: Some(TestSummary {
                total: 4,
                passed: 4,
                failed: 0,
                skipped: 0,
            }),
            ..Default::default()
        },
    );
    store.upsert_job(job.clone()).await.unwrap();
    job
}

#[tokio::test]
async fn test_badges() {
    let app = test_app("http://127.0.0.1:9", None, None, 10);

    let (status, body) = get_json(&app.router, "/badge/acme/uart?format=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "schemaVersion": 1, "label": "opencorps", "message": "unknown", "color": "lightgrey" })
    );

    seed_finished_job(&app.store, JobState::Passed).await;

    let (_, body) = get_json(&app.router, "/badge/acme/uart?format=json&workflow=sim").await;
    assert_eq!(body["label"], "sim");
    assert_eq!(body["message"], "passing");
    assert_eq!(body["color"], "brightgreen");

    let request = Request::builder()
        .uri("/badge/acme/uart")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/svg+xml");
    let svg = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&svg).contains("passing"));
}

#[tokio::test]
async fn test_job_history_and_lookup() {
    let app = test_app("http://127.0.0.1:9", None, None, 10);
    let job = seed_finished_job(&app.store, JobState::Failed).await;

    let (status, body) = get_json(&app.router, &format!("/api/v1/jobs/{}", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");
    assert_eq!(body["result"]["tests"]["total"], 4);

    let (status, body) = get_json(&app.router, "/api/v1/projects/acme/uart/jobs?limit=1000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = get_json(&app.router, "/api/v1/projects/acme/uart").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failing");
    assert_eq!(body["default_branch"], "master");

    let request = Request::builder()
        .uri("/api/v1/projects/acme/uart/history.csv")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(body).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains(&format!("{},{},master,sim,failed,4,0,,12,", job.id, SHA)));

    let (status, body) = get_json(&app.router, "/api/v1/jobs/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));

    let (status, _) = get_json(&app.router, "/api/v1/projects/acme/other/jobs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_project_config_posts_error_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/acme/uart/contents/.opencorps.yml")
                .query_param("ref", SHA);
            then.status(200).json_body(json!({
                "encoding": "base64",
                "content": STANDARD.encode("workflows:\n  - name: sim\n    tool: custom\n"),
            }));
        })
        .await;
    let status = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/repos/acme/uart/statuses/{}", SHA))
                .header("authorization", "token t0ken")
                .json_body_partial(
                    json!({ "state": "error", "context": "opencorps/config" }).to_string(),
                )
                .body_contains("invalid .opencorps.yml");
            then.status(201).json_body(json!({ "id": 3 }));
        })
        .await;
    let app = test_app(&server.base_url(), Some("t0ken"), None, 10);

    let (code, body) = send(
        &app.router,
        webhook_request("push", push_payload("refs/heads/master"), None),
    )
    .await;

    assert_eq!(code, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ignored");
    assert!(body["reason"].as_str().unwrap().starts_with("invalid"));
    assert_eq!(app.queue.len(), 0);
    status.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_artifacts_only_for_known_jobs() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("secret.zip"), b"TOP-SECRET").unwrap();
    let store = Arc::new(FileStore::open(temp_dir.path().join("results")).await.unwrap());
    let router = store_app(store.clone(), "http://127.0.0.1:9");

    let (status, body) = send(
        &router,
        Request::builder()
            .uri("/api/v1/jobs/..%2F..%2Fsecret/artifacts")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!String::from_utf8_lossy(&body).contains("TOP-SECRET"));

    let config = opencorps::ProjectConfig::from_yaml_str(PROJECT_YAML).unwrap();
    let job = Job::new(
        ProjectId::new("acme", "uart"),
        "https://github.com/acme/uart.git",
        opencorps::domain::model::Commit {
            sha: SHA.to_string(),
            branch: "master".to_string(),
            message: String::new(),
            author: String::new(),
            timestamp: chrono::Utc::now(),
        },
        config.workflows[0].clone(),
    );
    store.upsert_job(job.clone()).await.unwrap();
    store.put_artifact(&job.id, b"PK-bundle".to_vec()).await.unwrap();

    let request = Request::builder()
        .uri(format!("/api/v1/jobs/{}/artifacts", job.id))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/zip");
    let bundle = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bundle[..], b"PK-bundle");
}

#[tokio::test]
async fn test_push_with_bad_repository_name_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("results");
    let store = Arc::new(FileStore::open(&root).await.unwrap());
    let router = store_app(store.clone(), "http://127.0.0.1:9");

    let body = String::from_utf8(push_payload("refs/heads/master"))
        .unwrap()
        .replace("acme/uart", "../..");
    let (status, _) = send(&router, webhook_request("push", body.into_bytes(), None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!temp_dir.path().join("project.json").exists());
    assert!(store.list_projects().await.unwrap().is_empty());

    let (status, _) = get_json(&router, "/badge/..%2F../uart?format=json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_push_with_bad_commit_id_is_rejected() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let app = test_app("http://127.0.0.1:9", None, None, 10);

    let body = String::from_utf8(push_payload("refs/heads/master"))
        .unwrap()
        .replace(SHA, "éééééééé");
    let (status, body) = send(&app.router, webhook_request("push", body.into_bytes(), None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("commit id"));
    assert_eq!(app.queue.len(), 0);
}

#[tokio::test]
async fn test_list_registrable_repos() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200).json_body(json!({ "login": "acme", "name": null, "email": null }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/users/acme/repos");
            then.status(200).json_body(json!([
                { "full_name": "acme/uart", "clone_url": "https://github.com/acme/uart.git" },
                { "full_name": "acme/spi", "clone_url": "https://github.com/acme/spi.git" },
            ]));
        })
        .await;
    let app = test_app(&server.base_url(), Some("t0ken"), None, 10);
    seed_finished_job(&app.store, JobState::Passed).await;

    let (status, body) = get_json(&app.router, "/api/v1/repos").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["full_name"], "acme/uart");
    assert_eq!(body[0]["registered"], true);
    assert_eq!(body[1]["registered"], false);

    let anonymous = test_app(&server.base_url(), None, None, 10);
    let (status, _) = get_json(&anonymous.router, "/api/v1/repos").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
