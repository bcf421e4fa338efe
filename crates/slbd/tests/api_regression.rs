//! Ingress regression tests.
//!
//! Drives the full router against a running engine: backend config,
//! health reports, sticky policies, redirects, and the doWork path.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, Uri, header};
use axum::response::IntoResponse;
use serde_json::{Value, json};
use tower::ServiceExt;

use slb_api::{ApiState, ExecuteFuture, WorkExecutor, build_router};
use slb_core::{SchedulerConfig, SlbRequest};
use slb_scheduler::{DispatcherHandle, Engine};
use slb_state::StateStore;

struct Harness {
    engine: Engine,
    router: Router,
}

fn harness() -> Harness {
    harness_with(StateStore::open_in_memory().unwrap(), None)
}

fn harness_with(store: StateStore, executor: Option<Arc<dyn WorkExecutor>>) -> Harness {
    let engine = Engine::start(&SchedulerConfig::default(), Arc::new(store)).unwrap();
    let mut state = ApiState::new(engine.handle());
    if let Some(executor) = executor {
        state = state.with_executor(executor);
    }
    Harness {
        router: build_router(state),
        engine,
    }
}

async fn post(router: &Router, uri: &str, body: Value) -> Response<Body> {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    router.clone().oneshot(req).await.unwrap()
}

async fn get(router: &Router, uri: &str) -> Response<Body> {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(req).await.unwrap()
}

async fn body_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(resp: &Response<Body>) -> &str {
    resp.headers()[header::LOCATION].to_str().unwrap()
}

/// Register one CPU backend and one GPU backend.
async fn configure(router: &Router) {
    let resp = post(
        router,
        "/api/v1/server/config",
        json!({
            "global": {"timeout": 30, "statusListenAddr": ":9000"},
            "backends": [
                {"name": "cpu-1", "host": "10.0.0.1", "serverPort": 8080, "category": "cpu", "weight": 5},
                {"name": "gpu-1", "host": "10.0.1.1", "serverPort": 9090, "category": "GPU", "weight": 1}
            ]
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["added"], 2);
}

async fn report(router: &Router, ip: &str, cpu: u32, down: bool) {
    let resp = post(
        router,
        "/api/v1/server/state",
        json!({"ip": ip, "cpuUtil": cpu, "ioWait": 1, "memUtil": 40, "memTotalBytes": 1024, "down": down}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

/// Health reports are only enqueued by the ingress; wait until applied.
async fn wait_for_health(handle: &DispatcherHandle, ip: &str, down: bool) {
    loop {
        let status = handle.status().await.unwrap();
        if status
            .servers
            .iter()
            .any(|s| s.ip == ip && s.health.down == down)
        {
            return;
        }
        tokio::task::yield_now().await;
    }
}

async fn bring_up(h: &Harness, ip: &str) {
    report(&h.router, ip, 10, false).await;
    wait_for_health(&h.engine.handle(), ip, false).await;
}

// ── Selection ──────────────────────────────────────────────────

#[tokio::test]
async fn select_without_servers_is_500() {
    let h = harness();
    let resp = post(&h.router, "/api/v1/select", json!({"taskType": "cpu"})).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert_eq!(body["success"], false);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn select_redirects_to_healthy_backend() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    let resp = post(&h.router, "/api/v1/select", json!({"taskType": "cpu", "sessionId": "s1"})).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "http://10.0.0.1:8080/api/v1/select");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn empty_body_selects_cpu() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/select")
        .body(Body::empty())
        .unwrap();
    let resp = h.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(location(&resp).starts_with("http://10.0.0.1:8080"));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn fallback_keeps_path_and_query() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.1.1").await;

    let resp = post(
        &h.router,
        "/render/frame?sessionId=abc&scale=2",
        json!({"taskType": "gpu"}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        location(&resp),
        "http://10.0.1.1:9090/render/frame?sessionId=abc&scale=2"
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn fallback_leaves_client_query_alone() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    // Parameters that collide with request fields belong to the client app.
    for uri in ["/video/stream?id=5&priority=high", "/video/stream?mode=fast&taskType=gpu"] {
        let resp = get(&h.router, uri).await;
        assert_eq!(resp.status(), StatusCode::FOUND, "{uri}");
        assert_eq!(location(&resp), format!("http://10.0.0.1:8080{uri}"));
    }
    h.engine.shutdown().await;
}

#[tokio::test]
async fn fallback_ignores_foreign_body() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    let req = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", "text/plain")
        .body(Body::from("raw application payload"))
        .unwrap();
    let resp = h.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "http://10.0.0.1:8080/upload");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn select_with_query_keeps_full_uri() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    let resp = post(&h.router, "/api/v1/select?trace=1", json!({})).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "http://10.0.0.1:8080/api/v1/select?trace=1");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn overloaded_backend_is_not_selected() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    report(&h.router, "10.0.0.1", 95, false).await;
    loop {
        let status = h.engine.handle().status().await.unwrap();
        if status.servers.iter().any(|s| s.health.cpu_util == 95) {
            break;
        }
        tokio::task::yield_now().await;
    }

    let resp = post(&h.router, "/api/v1/select", json!({"taskType": "cpu"})).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn unknown_task_type_is_500() {
    let h = harness();
    configure(&h.router).await;
    let resp = post(&h.router, "/api/v1/select", json!({"taskType": "fpga"})).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    h.engine.shutdown().await;
}

// ── doWork ─────────────────────────────────────────────────────

#[tokio::test]
async fn do_work_without_executor_is_501() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    let resp = post(&h.router, "/api/v1/select", json!({"mode": "doWork"})).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    h.engine.shutdown().await;
}

struct EchoExecutor;

impl WorkExecutor for EchoExecutor {
    fn execute<'a>(&'a self, target: &'a str, request: SlbRequest, uri: Uri) -> ExecuteFuture<'a> {
        Box::pin(async move {
            axum::Json(json!({
                "target": target,
                "session": request.session_id,
                "path": uri.path(),
            }))
            .into_response()
        })
    }
}

#[tokio::test]
async fn do_work_hands_target_to_executor() {
    let h = harness_with(
        StateStore::open_in_memory().unwrap(),
        Some(Arc::new(EchoExecutor)),
    );
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;

    let resp = post(
        &h.router,
        "/api/v1/select",
        json!({"mode": "doWork", "sessionId": "job-7"}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["target"], "10.0.0.1:8080");
    assert_eq!(body["session"], "job-7");
    assert_eq!(body["path"], "/api/v1/select");
    h.engine.shutdown().await;
}

// ── Policies ───────────────────────────────────────────────────

#[tokio::test]
async fn policy_validation_is_reported_in_body() {
    let h = harness();
    configure(&h.router).await;

    let resp = post(&h.router, "/api/v1/user/policy", json!({"userId": "", "priority": 1})).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["retCode"], "fail");

    let resp = post(
        &h.router,
        "/api/v1/user/policy",
        json!({"userId": "u1", "priority": 1, "pinnedIp": "300.1.1.1"}),
    )
    .await;
    assert_eq!(body_json(resp).await["retCode"], "fail");

    let resp = post(
        &h.router,
        "/api/v1/user/policy",
        json!({"userId": "u1", "priority": 1, "pinnedIp": "10.9.9.9"}),
    )
    .await;
    assert_eq!(body_json(resp).await["retCode"], "fail");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn pinned_user_is_redirected_to_pin() {
    let h = harness();
    configure(&h.router).await;
    bring_up(&h, "10.0.0.1").await;
    bring_up(&h, "10.0.1.1").await;

    let resp = post(
        &h.router,
        "/api/v1/user/policy",
        json!({"userId": "alice", "priority": 3, "pinnedIp": "10.0.1.1"}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({"retCode": "success", "message": "success"})
    );

    // The pin wins over the task type.
    let resp = post(&h.router, "/api/v1/select", json!({"userId": "alice", "taskType": "cpu"})).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(location(&resp).starts_with("http://10.0.1.1:9090"));

    report(&h.router, "10.0.1.1", 10, true).await;
    wait_for_health(&h.engine.handle(), "10.0.1.1", true).await;
    let resp = post(&h.router, "/api/v1/select", json!({"userId": "alice"})).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn policies_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slb.redb");

    let h = harness_with(StateStore::open(&path).unwrap(), None);
    let resp = post(&h.router, "/api/v1/user/policy", json!({"userId": "bob", "priority": 6})).await;
    assert_eq!(body_json(resp).await["retCode"], "success");
    h.engine.shutdown().await;

    let h = harness_with(StateStore::open(&path).unwrap(), None);
    let status = body_json(get(&h.router, "/api/v1/status").await).await;
    assert_eq!(status["data"]["policies"][0]["user_id"], "bob");
    assert_eq!(status["data"]["policies"][0]["priority"], 6);
    h.engine.shutdown().await;
}

// ── Collaborator inputs ────────────────────────────────────────

#[tokio::test]
async fn malformed_state_report_is_rejected() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/server/state")
        .header("content-type", "application/json")
        .body(Body::from("{\"ip\": 42"))
        .unwrap();
    let resp = h.router.clone().oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn config_update_is_idempotent_over_http() {
    let h = harness();
    configure(&h.router).await;

    let resp = post(
        &h.router,
        "/api/v1/server/config",
        json!({
            "backends": [
                {"name": "cpu-1", "host": "10.0.0.1", "serverPort": 8080, "category": "cpu", "weight": 5},
                {"name": "gpu-1", "host": "10.0.1.1", "serverPort": 9090, "category": "GPU", "weight": 1}
            ]
        }),
    )
    .await;
    let body = body_json(resp).await;
    assert_eq!(body["data"], json!({"added": 0, "updated": 2, "removed": 0}));

    let status = body_json(get(&h.router, "/api/v1/status").await).await;
    let servers = status["data"]["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0]["ip"], "10.0.0.1");
    assert_eq!(servers[0]["category"], "CPU");
    assert_eq!(servers[0]["health"]["down"], true);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn status_reports_queue_depths() {
    let h = harness();
    let resp = get(&h.router, "/api/v1/status").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["pending_priority"], 0);
    assert_eq!(body["data"]["pending_by_category"]["CPU"], 0);
    assert_eq!(body["data"]["pending_by_category"]["GPU"], 0);
    h.engine.shutdown().await;
}
