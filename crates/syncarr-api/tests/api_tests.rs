use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use syncarr_api::{router, ApiState};
use syncarr_application::{ExtractOutput, ExtractTarget, ExtractorError, HttpImageFetcher, MediaExtractor};
use syncarr_config::{AppConfig, DatabaseConfig};
use syncarr_domain::{Source, SourceKind};
use syncarr_scheduler::jobs::{self, HOUSEKEEPING, INDEX_SOURCE, QUEUE_DATABASE, QUEUE_LIMITED};
use syncarr_scheduler::{Lifecycle, Scheduler};
use tempfile::TempDir;
use tower::ServiceExt;

struct EmptyExtractor;

#[async_trait]
impl MediaExtractor for EmptyExtractor {
    async fn fetch_or_download(&self, _target: &ExtractTarget) -> Result<ExtractOutput, ExtractorError> {
        Ok(ExtractOutput::Listing(Vec::new()))
    }
}

struct TestApp {
    _dir: TempDir,
    scheduler: Arc<Scheduler>,
    router: Router,
}

async fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("syncarr.db").display());
    let pool = syncarr_infrastructure::connect(&url, &DatabaseConfig::default())
        .await
        .unwrap();
    let mut config = AppConfig::default();
    config.downloads.root = dir.path().join("downloads");
    let scheduler = Scheduler::with_adapters(
        config.clone(),
        pool,
        Lifecycle::new(&config.tasks.poll),
        Arc::new(EmptyExtractor),
        Arc::new(HttpImageFetcher::new(syncarr_infrastructure::http_client().unwrap())),
        Vec::new(),
    )
    .unwrap();
    let scheduler = Arc::new(scheduler);
    let router = router(ApiState::new(scheduler.clone()));
    TestApp {
        _dir: dir,
        scheduler,
        router,
    }
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn queue(&self, name: &str) -> Value {
        let (status, body) = self.send(Method::GET, "/api/v1/queues", None).await;
        assert_eq!(status, StatusCode::OK);
        body.as_array()
            .unwrap()
            .iter()
            .find(|q| q["name"] == name)
            .cloned()
            .unwrap_or_else(|| panic!("queue {name} missing"))
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let (status, body) = app.send(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn queues_are_listed_with_their_settings() {
    let app = app().await;
    let (status, body) = app.send(Method::GET, "/api/v1/queues", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["name"].as_str().unwrap())
        .collect();
    for expected in ["database", "filesystem", "limited", "network"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    let limited = app.queue(QUEUE_LIMITED).await;
    assert_eq!(limited["pending"], 0);
    assert!(limited["workers"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn posted_tasks_land_on_their_job_queue() {
    let app = app().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/tasks",
            Some(json!({ "job": HOUSEKEEPING, "verbose_name": "Nightly cleanup" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["queue"], QUEUE_DATABASE);
    assert_eq!(body["state"], "PENDING");
    assert_eq!(body["verbose_name"], "Nightly cleanup");
    assert_eq!(body["attempts"], 0);

    let id = body["id"].as_str().unwrap();
    let (status, fetched) = app.send(Method::GET, &format!("/api/v1/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id);
    assert_eq!(app.queue(QUEUE_DATABASE).await["pending"], 1);
}

#[tokio::test]
async fn bad_task_requests_are_rejected() {
    let app = app().await;
    let (status, body) = app
        .send(Method::POST, "/api/v1/tasks", Some(json!({ "job": "no_such_job" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no_such_job"));

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/tasks",
            Some(json!({ "job": HOUSEKEEPING, "args": { "not": "a list" } })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send(Method::GET, "/api/v1/tasks/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .send(
            Method::GET,
            "/api/v1/tasks/00000000-0000-4000-8000-000000000000",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reset_empties_a_queue() {
    let app = app().await;
    for n in 0..3 {
        let (status, _) = app
            .send(
                Method::POST,
                "/api/v1/tasks",
                Some(json!({ "job": HOUSEKEEPING, "args": [n] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    assert_eq!(app.queue(QUEUE_DATABASE).await["pending"], 3);

    let (status, body) = app
        .send(Method::POST, "/api/v1/queues/database/reset", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "queue": "database", "status": "finished" }));
    assert_eq!(app.queue(QUEUE_DATABASE).await["pending"], 0);

    let (status, _) = app.send(Method::POST, "/api/v1/queues/nope/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_listing_requires_a_known_queue() {
    let app = app().await;
    let (status, body) = app
        .send(Method::GET, "/api/v1/queues/network/failed?limit=5", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = app.send(Method::GET, "/api/v1/queues/nope/failed", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_source_revokes_its_tasks() {
    let app = app().await;
    let source = app
        .scheduler
        .sources()
        .create(Source::new("Talks", SourceKind::Channel, "UC1", "talks"))
        .await
        .unwrap();
    let task_id = app
        .scheduler
        .handle()
        .enqueue(INDEX_SOURCE, jobs::index_options(&source, None))
        .await
        .unwrap();

    let uri = format!("/api/v1/sources/{}", source.id);
    let (status, body) = app.send(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source_id"], source.id.to_string());
    assert_eq!(body["revoked_tasks"], json!([task_id.to_string()]));

    let (status, task) = app
        .send(Method::GET, &format!("/api/v1/tasks/{task_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["state"], "REVOKED");

    let (status, _) = app.send(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send(Method::DELETE, "/api/v1/sources/xyz", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn swagger_document_is_served() {
    let app = app().await;
    let (status, body) = app.send(Method::GET, "/api-doc/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "Syncarr API");
    assert!(body["paths"]["/api/v1/queues"].is_object());
}
