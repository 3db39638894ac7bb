//! Shared helpers: axum servers impersonating cluster nodes, and transports
//! that inject failures or latency in front of a real `reqwest::Client`.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::{Mutex, RwLock};
use prism_elastic::{BoxError, Config, RequestLogger, Transport};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mutable behaviour of a mock node
#[derive(Clone)]
pub struct MockState {
    pub name: String,
    pub root_status: Arc<AtomicU16>,
    pub root_delay_ms: Arc<AtomicU64>,
    pub nodes_delay_ms: Arc<AtomicU64>,
    pub nodes_body: Arc<RwLock<Value>>,
    pub plugins: Arc<RwLock<Vec<String>>>,
    pub root_started: Arc<AtomicUsize>,
    /// Root handlers dropped before they produced a response
    pub root_abandoned: Arc<AtomicUsize>,
    pub nodes_started: Arc<AtomicUsize>,
    /// `/_nodes/http` handlers dropped before they produced a response
    pub nodes_abandoned: Arc<AtomicUsize>,
    /// Gzip the root body for clients that accept it
    pub gzip_root: Arc<AtomicBool>,
    pub gzip_served: Arc<AtomicUsize>,
    pub requests: Arc<AtomicUsize>,
}

/// Counts a handler as abandoned when it is dropped before `finish`
struct InFlight {
    abandoned: Arc<AtomicUsize>,
    finished: bool,
}

impl InFlight {
    fn new(abandoned: &Arc<AtomicUsize>) -> Self {
        Self {
            abandoned: Arc::clone(abandoned),
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A running mock node
pub struct MockNode {
    pub url: String,
    pub addr: String,
    pub state: MockState,
    handle: tokio::task::JoinHandle<()>,
}

impl MockNode {
    pub async fn start(name: &str) -> Self {
        let state = MockState {
            name: name.to_string(),
            root_status: Arc::new(AtomicU16::new(200)),
            root_delay_ms: Arc::new(AtomicU64::new(0)),
            nodes_delay_ms: Arc::new(AtomicU64::new(0)),
            nodes_body: Arc::new(RwLock::new(json!({"cluster_name": "mock", "nodes": {}}))),
            plugins: Arc::new(RwLock::new(Vec::new())),
            root_started: Arc::new(AtomicUsize::new(0)),
            root_abandoned: Arc::new(AtomicUsize::new(0)),
            nodes_started: Arc::new(AtomicUsize::new(0)),
            nodes_abandoned: Arc::new(AtomicUsize::new(0)),
            gzip_root: Arc::new(AtomicBool::new(false)),
            gzip_served: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
        };

        let router = Router::new()
            .route("/", get(root))
            .route("/_nodes/http", get(nodes_http))
            .route("/_nodes/plugins", get(nodes_plugins))
            .route("/fail", any(fail))
            .route("/missing", any(missing))
            .route("/big", get(big))
            .route("/big-chunked", get(big_chunked))
            .route("/auth", get(auth))
            .fallback(ok)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            addr,
            state,
            handle,
        }
    }

    /// Advertise `entries` (node id, publish address) on `/_nodes/http`
    pub fn advertise(&self, entries: &[(&str, &str)]) {
        *self.state.nodes_body.write() = nodes_http_body(entries);
    }

    pub fn set_plugins(&self, plugins: &[&str]) {
        *self.state.plugins.write() = plugins.iter().map(|p| p.to_string()).collect();
    }

    pub fn set_root_status(&self, status: u16) {
        self.state.root_status.store(status, Ordering::SeqCst);
    }

    pub fn set_root_delay(&self, delay: Duration) {
        self.state.root_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_nodes_delay(&self, delay: Duration) {
        self.state.nodes_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn root_started(&self) -> usize {
        self.state.root_started.load(Ordering::SeqCst)
    }

    pub fn root_abandoned(&self) -> usize {
        self.state.root_abandoned.load(Ordering::SeqCst)
    }

    pub fn nodes_started(&self) -> usize {
        self.state.nodes_started.load(Ordering::SeqCst)
    }

    pub fn nodes_abandoned(&self) -> usize {
        self.state.nodes_abandoned.load(Ordering::SeqCst)
    }

    /// Serve the root body gzip-encoded to clients sending `Accept-Encoding: gzip`
    pub fn gzip_root(&self, enabled: bool) {
        self.state.gzip_root.store(enabled, Ordering::SeqCst);
    }

    pub fn gzip_served(&self) -> usize {
        self.state.gzip_served.load(Ordering::SeqCst)
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn nodes_http_body(entries: &[(&str, &str)]) -> Value {
    let nodes: serde_json::Map<String, Value> = entries
        .iter()
        .map(|(id, address)| {
            (
                id.to_string(),
                json!({
                    "name": format!("node-{}", id),
                    "version": "7.17.0",
                    "roles": ["data", "master"],
                    "http": {"publish_address": address}
                }),
            )
        })
        .collect();
    json!({"cluster_name": "mock", "nodes": nodes})
}

async fn root(State(state): State<MockState>, headers: HeaderMap) -> Response {
    state.root_started.fetch_add(1, Ordering::SeqCst);
    let in_flight = InFlight::new(&state.root_abandoned);
    let delay = state.root_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    in_flight.finish();
    state.requests.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.root_status.load(Ordering::SeqCst)).unwrap();
    let body = json!({
        "name": state.name,
        "cluster_name": "mock",
        "cluster_uuid": "uuid-1",
        "version": {"number": "7.17.0", "build_flavor": "default", "lucene_version": "8.11.1"},
        "tagline": "You Know, for Search"
    });

    let accepts_gzip = headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.contains("gzip"));
    if state.gzip_root.load(Ordering::SeqCst) && accepts_gzip {
        state.gzip_served.fetch_add(1, Ordering::SeqCst);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body.to_string().as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        return (
            status,
            [("content-type", "application/json"), ("content-encoding", "gzip")],
            compressed,
        )
            .into_response();
    }
    (status, Json(body)).into_response()
}

async fn nodes_http(State(state): State<MockState>) -> Json<Value> {
    state.nodes_started.fetch_add(1, Ordering::SeqCst);
    let in_flight = InFlight::new(&state.nodes_abandoned);
    let delay = state.nodes_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    in_flight.finish();
    state.requests.fetch_add(1, Ordering::SeqCst);
    Json(state.nodes_body.read().clone())
}

async fn nodes_plugins(State(state): State<MockState>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let plugins: Vec<Value> = state
        .plugins
        .read()
        .iter()
        .map(|name| json!({"name": name, "version": "7.17.0"}))
        .collect();
    Json(json!({"nodes": {"n1": {"name": state.name, "plugins": plugins}}}))
}

async fn fail(State(state): State<MockState>) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": {"type": "search_phase_execution_exception", "reason": "all shards failed"},
            "status": 500
        })),
    )
}

async fn missing(State(state): State<MockState>) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not found", "status": 404})),
    )
}

async fn big() -> impl IntoResponse {
    vec![b'x'; 64 * 1024]
}

async fn big_chunked() -> impl IntoResponse {
    let chunks = (0..64).map(|_| Ok::<_, std::io::Error>(bytes::Bytes::from(vec![b'y'; 1024])));
    Body::from_stream(futures::stream::iter(chunks))
}

async fn auth(headers: HeaderMap) -> Json<Value> {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    Json(json!({"authorization": value}))
}

async fn ok(State(state): State<MockState>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({"ok": true, "node": state.name}))
}

/// Config with background activity off, pointed at `urls`
pub fn quiet_config(urls: &[&str]) -> Config {
    let mut config = Config {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        retry_backoff_ms: 1,
        ..Default::default()
    };
    config.sniffer.enabled = false;
    config.health_check.enabled = false;
    config
}

/// Fails requests whose path starts with `path`, counting every attempt
#[derive(Clone)]
pub struct FailingTransport {
    pub path: String,
    /// Fail only this many matching requests; `None` fails all of them
    pub limit: Option<usize>,
    pub attempts: Arc<AtomicUsize>,
    pub failures: Arc<AtomicUsize>,
    next: reqwest::Client,
}

impl FailingTransport {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            limit: None,
            attempts: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            next: reqwest::Client::new(),
        }
    }

    pub fn failing_first(path: &str, count: usize) -> Self {
        Self {
            limit: Some(count),
            ..Self::new(path)
        }
    }

    pub fn passthrough() -> Self {
        Self::new("/__never__")
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response, BoxError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if request.url().path().starts_with(&self.path) {
            let failed = self.failures.fetch_add(1, Ordering::SeqCst);
            if self.limit.map_or(true, |limit| failed < limit) {
                return Err("request failed".into());
            }
        }
        Ok(self.next.execute(request).await?)
    }
}

/// Sleeps before forwarding every request
#[derive(Clone)]
pub struct SleepingTransport {
    pub delay: Duration,
    next: reqwest::Client,
}

impl SleepingTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for SleepingTransport {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response, BoxError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.next.execute(request).await?)
    }
}

/// Collects logged lines
#[derive(Clone, Default)]
pub struct RecordingLogger {
    pub lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl RequestLogger for RecordingLogger {
    fn log(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Poll `check` every 10 ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
