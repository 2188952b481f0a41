#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use cluster_harness::node::{AttachedNode, NodeClient};

type Params = Query<HashMap<String, String>>;

/// In-process stand-in for one worker's JSON control surface
#[derive(Debug, Default)]
pub struct MockWorker {
    pub cloud_size: AtomicUsize,
    /// Trees added per RFView poll
    pub trees_per_poll: AtomicI64,
    /// Report `progress_total` without the commit step
    pub drop_commit_step: Mutex<bool>,
    pub view_polls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    pub uploads: Mutex<Vec<(String, usize)>>,
    /// RFView bodies served before the generated progression takes over
    pub view_script: Mutex<VecDeque<Value>>,
    /// Files present under the import locations
    pub importable: Mutex<Vec<String>>,
    pub parsed_keys: Mutex<Vec<String>>,
}

impl MockWorker {
    pub fn new(cloud_size: usize) -> Arc<Self> {
        let worker = Self::default();
        worker.cloud_size.store(cloud_size, Ordering::SeqCst);
        worker.trees_per_poll.store(2, Ordering::SeqCst);
        Arc::new(worker)
    }
}

pub async fn start_mock_worker(worker: Arc<MockWorker>) -> SocketAddr {
    let app = Router::new()
        .route("/Cloud.json", get(cloud))
        .route("/PutFile.json", post(put_file))
        .route("/Parse.json", get(parse))
        .route("/RF.json", get(rf))
        .route("/RFView.json", get(rf_view))
        .route("/GLM.json", get(glm))
        .route("/ImportFiles.json", get(import_files))
        .route("/ImportS3.json", get(import_s3))
        .route("/ImportHdfs.json", get(import_hdfs))
        .route("/Inspect.json", get(inspect))
        .route("/Netstat.json", get(netstat))
        .route("/Shutdown.json", get(shutdown))
        .with_state(worker);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("Mock worker error: {}", e);
        }
    });
    addr
}

pub async fn attach(worker: Arc<MockWorker>) -> Arc<dyn NodeClient> {
    let addr = start_mock_worker(worker).await;
    Arc::new(AttachedNode::connect(&addr.ip().to_string(), addr.port()).unwrap())
}

async fn cloud(State(w): State<Arc<MockWorker>>) -> Json<Value> {
    Json(json!({
        "cloud_name": "mock",
        "cloud_size": w.cloud_size.load(Ordering::SeqCst),
        "consensus": true
    }))
}

async fn put_file(State(w): State<Arc<MockWorker>>, Query(q): Params, body: Bytes) -> Json<Value> {
    let key = q.get("key").cloned().unwrap_or_default();
    w.uploads.lock().unwrap().push((key.clone(), body.len()));
    Json(json!({ "key": key }))
}

async fn parse(State(w): State<Arc<MockWorker>>, Query(q): Params) -> Json<Value> {
    match (q.get("Key"), q.get("Key2")) {
        (Some(key), Some(dest)) => {
            w.parsed_keys.lock().unwrap().push(key.clone());
            Json(json!({ "destination_key": dest }))
        }
        _ => Json(json!({ "error": "Key and Key2 are required" })),
    }
}

async fn rf(State(w): State<Arc<MockWorker>>, Query(q): Params) -> Json<Value> {
    let Some(data_key) = q.get("data_key").filter(|k| !k.is_empty()) else {
        return Json(json!({ "error": "Missing data_key" }));
    };
    w.view_polls.store(0, Ordering::SeqCst);
    let ntree: i64 = q.get("ntree").and_then(|n| n.parse().ok()).unwrap_or(50);
    Json(json!({
        "data_key": data_key,
        "model_key": q.get("model_key").cloned().unwrap_or_else(|| "model".to_string()),
        "ntree": ntree
    }))
}

async fn rf_view(State(w): State<Arc<MockWorker>>, Query(q): Params) -> Json<Value> {
    let ntree: i64 = q.get("ntree").and_then(|n| n.parse().ok()).unwrap_or(0);
    let polls = w.view_polls.fetch_add(1, Ordering::SeqCst) as i64 + 1;
    if let Some(body) = w.view_script.lock().unwrap().pop_front() {
        return Json(body);
    }
    let built = (polls * w.trees_per_poll.load(Ordering::SeqCst)).min(ntree);
    let done = built == ntree;
    let total = if *w.drop_commit_step.lock().unwrap() { ntree } else { ntree + 1 };

    Json(json!({
        "data_key": q.get("data_key"),
        "model_key": q.get("model_key"),
        "ntree": ntree,
        "trees": { "number_built": built },
        "response": {
            "status": if done { "done" } else { "poll" },
            "progress": if done { total } else { built },
            "progress_total": total
        }
    }))
}

fn imported(w: &MockWorker, scheme: &str, location: &str) -> Json<Value> {
    let files = w.importable.lock().unwrap();
    let succeeded: Vec<Value> = files
        .iter()
        .map(|f| json!({ "file": f, "key": format!("{}:/{}/{}", scheme, location, f) }))
        .collect();
    Json(json!({ "succeeded": succeeded, "failed": [] }))
}

async fn import_files(State(w): State<Arc<MockWorker>>, Query(q): Params) -> Json<Value> {
    match q.get("path") {
        Some(path) => imported(&w, "nfs", path),
        None => Json(json!({ "error": "Missing path" })),
    }
}

async fn import_s3(State(w): State<Arc<MockWorker>>, Query(q): Params) -> Json<Value> {
    match q.get("bucket") {
        Some(bucket) => imported(&w, "s3", bucket),
        None => Json(json!({ "error": "Missing bucket" })),
    }
}

async fn import_hdfs(State(w): State<Arc<MockWorker>>, Query(q): Params) -> Json<Value> {
    match q.get("path") {
        Some(path) => imported(&w, "hdfs", path),
        None => Json(json!({ "error": "Missing path" })),
    }
}

async fn glm(Query(q): Params) -> Json<Value> {
    Json(json!({
        "key": q.get("key"),
        "destination_key": "GLM_model",
        "coefficients": { "x": 0.5, "Intercept": 1.0 }
    }))
}

async fn inspect(Query(q): Params) -> Json<Value> {
    let key = q.get("key").cloned().unwrap_or_default();
    Json(json!({
        "key": key,
        "rows": 100,
        "cols": 2,
        "columns": [
            { "name": "x", "type": "int" },
            { "name": "y", "type": "enum" }
        ]
    }))
}

async fn netstat() -> Json<Value> {
    Json(json!({ "nodes": [{ "tcp": { "established": 4 } }] }))
}

async fn shutdown(State(w): State<Arc<MockWorker>>) -> Json<Value> {
    w.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "status": "shutting down" }))
}
