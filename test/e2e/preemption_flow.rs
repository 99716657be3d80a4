//! End-to-end preemption flow over HTTP.
//!
//! Runs the scheduler service on a loopback port with a file-backed store
//! and drives it the way an executor would:
//!
//! 1. Create a pool and two funded accounts
//! 2. Queue a low-priority task and place it on a worker
//! 3. Queue a high-priority task while no worker is idle
//! 4. Observe the preemption through the cancellations endpoint
//! 5. Confirm the abort and the new assignment
//! 6. Restart the service on the same state directory
//!
//! ## Running
//!
//! ```bash
//! cargo test -p qs-e2e --test preemption_flow
//! ```

use std::path::Path;
use std::sync::Arc;

use qs_service::{api, state::AppState, store::FilePoolStore};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Server {
    base_url: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Server {
    async fn start(state_dir: &Path) -> Self {
        let store = FilePoolStore::open(state_dir).await.unwrap();
        let app = api::create_router(AppState::new(Arc::new(store)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        self.handle.await.unwrap();
    }
}

struct Executor {
    client: reqwest::Client,
    base_url: String,
}

impl Executor {
    fn new(server: &Server) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/v1/pools/e2e", server.base_url),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> (u16, Value) {
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        let bytes = response.bytes().await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, path: &str) -> Value {
        let (status, body) = self
            .send(self.client.get(format!("{}{path}", self.base_url)))
            .await;
        assert_eq!(status, 200, "GET {path}: {body}");
        body
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(self.client.post(format!("{}{path}", self.base_url)).json(&body))
            .await
    }

    async fn put(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(self.client.put(format!("{}{path}", self.base_url)).json(&body))
            .await
    }

    async fn notify(&self, notification: Value) {
        let (status, body) = self
            .post("/notify-tasks", json!({ "notifications": [notification] }))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["rejected"], 0, "notification rejected: {body}");
    }

    async fn assign(&self, time: &str, workers: &[&str]) -> Value {
        let idle: Vec<Value> = workers
            .iter()
            .map(|w| json!({ "worker_id": w, "dimensions": ["pool:e2e"] }))
            .collect();
        let (status, body) = self
            .post("/assign-tasks", json!({ "time": time, "idle_workers": idle }))
            .await;
        assert_eq!(status, 200);
        body["assignments"].clone()
    }
}

fn waiting(task: &str, account: &str, time: &str) -> Value {
    json!({
        "task_id": task,
        "time": time,
        "state": 0x10,
        "tags": [format!("qs_account:{account}")],
        "slices": [{ "dimensions": ["pool:e2e"] }],
    })
}

fn running(task: &str, worker: &str, time: &str) -> Value {
    json!({ "task_id": task, "time": time, "state": 0x20, "bot_id": worker })
}

fn killed(task: &str, time: &str) -> Value {
    json!({ "task_id": task, "time": time, "state": 0x43 })
}

#[tokio::test]
async fn test_preemption_flow_survives_restart() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("qs_service=debug,qs_reconcile=debug")
        .with_test_writer()
        .try_init();

    let state_dir = tempfile::tempdir().unwrap();
    let server = Server::start(state_dir.path()).await;
    let exec = Executor::new(&server);

    // Pool and accounts.
    let (status, _) = exec.post("", json!({})).await;
    assert_eq!(status, 201);
    let (status, _) = exec
        .put("/accounts/batch", json!({ "initial_balance": [0.0, 1.0, 0.0] }))
        .await;
    assert_eq!(status, 200);
    let (status, _) = exec
        .put("/accounts/urgent", json!({ "initial_balance": [1.0, 0.0, 0.0] }))
        .await;
    assert_eq!(status, 200);

    // A batch task lands on the only worker.
    exec.notify(waiting("low", "batch", "2030-01-01T00:00:00Z")).await;
    let assignments = exec.assign("2030-01-01T00:00:01Z", &["w1"]).await;
    assert_eq!(
        assignments,
        json!([{ "worker_id": "w1", "task_id": "low", "slice_number": 0 }])
    );
    exec.notify(running("low", "w1", "2030-01-01T00:00:02Z")).await;

    // An urgent task arrives while nothing is idle.
    exec.notify(waiting("high", "urgent", "2030-01-01T00:00:03Z")).await;
    let assignments = exec.assign("2030-01-01T00:00:04Z", &[]).await;
    assert_eq!(assignments, json!([]));

    let cancellations = exec.get("/cancellations").await;
    assert_eq!(
        cancellations["cancellations"],
        json!([{ "worker_id": "w1", "task_id": "low" }])
    );

    // The executor kills the preempted task, then w1 asks for work.
    exec.notify(killed("low", "2030-01-01T00:00:05Z")).await;
    assert_eq!(exec.get("/cancellations").await["cancellations"], json!([]));

    let assignments = exec.assign("2030-01-01T00:00:06Z", &["w1"]).await;
    assert_eq!(
        assignments,
        json!([{ "worker_id": "w1", "task_id": "high", "slice_number": 0 }])
    );

    server.stop().await;

    // Decisions and balances were persisted.
    let server = Server::start(state_dir.path()).await;
    let exec = Executor::new(&server);

    let pool = exec.get("").await;
    assert_eq!(pool["worker_queues"]["w1"]["task_to_assign"], "high");
    assert_eq!(pool["running"], 1);

    exec.notify(running("high", "w1", "2030-01-01T00:00:07Z")).await;
    let pool = exec.get("").await;
    assert_eq!(pool["worker_queues"], json!({}));
    assert_eq!(pool["workers"][0]["running_task"], "high");

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_pool_reports_problem_details() {
    let state_dir = tempfile::tempdir().unwrap();
    let server = Server::start(state_dir.path()).await;
    let exec = Executor::new(&server);

    let response = exec
        .client
        .get(format!("{}/cancellations", exec.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers()["content-type"],
        "application/problem+json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "pool_not_found");

    server.stop().await;
}
