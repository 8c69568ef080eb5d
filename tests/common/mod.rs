#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use reqwest::Client;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use cellarsync::config::{Config, SyncSettings, UpstreamConfig};
use cellarsync::connectivity::Connectivity;
use cellarsync::models::ActionType;
use cellarsync::queue::QueueManager;
use cellarsync::remote::{
    CapabilityRegistry, ClubApiClient, DispatchContext, RemoteCapability, RemoteError,
    RemoteOutcome,
};
use cellarsync::state::SharedState;
use cellarsync::sync::{SyncCoordinator, SyncEvent};

// ── Storage ─────────────────────────────────────────────────────

/// Fresh in-memory queue database with migrations applied. One connection
/// that never recycles, so the database lives as long as the pool.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// File-backed queue database, created on first use.
pub async fn file_pool(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .expect("Failed to open database file");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Settings with short delays and background timers pushed out of the way.
pub fn test_settings() -> SyncSettings {
    SyncSettings {
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        inter_action_delay: Duration::ZERO,
        sync_interval: Duration::from_secs(3600),
        status_poll_interval: Duration::from_secs(3600),
        probe_interval: Duration::from_secs(3600),
        ..SyncSettings::default()
    }
}

// ── Fake capabilities ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Call {
    pub payload: Value,
    pub idempotency_key: Option<Uuid>,
    pub at: Instant,
}

/// Scripted stand-in for an upstream capability. Scripted results are used
/// first, then `fallback` for every further call.
pub struct FakeCapability {
    action_type: ActionType,
    script: Mutex<VecDeque<Result<RemoteOutcome, RemoteError>>>,
    fallback: Option<RemoteError>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl FakeCapability {
    pub fn succeeding(action_type: ActionType) -> Self {
        Self {
            action_type,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(action_type: ActionType, err: RemoteError) -> Self {
        Self {
            fallback: Some(err),
            ..Self::succeeding(action_type)
        }
    }

    pub fn then(self, result: Result<RemoteOutcome, RemoteError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteCapability for FakeCapability {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    fn name(&self) -> &str {
        "Fake"
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        payload: &Value,
    ) -> Result<RemoteOutcome, RemoteError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                payload: payload.clone(),
                idempotency_key: ctx.idempotency_key,
                at: Instant::now(),
            });
            calls.len()
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }

        match &self.fallback {
            Some(err) => Err(err.clone()),
            None => Ok(RemoteOutcome::new(json!({ "id": format!("srv-{n}") }))),
        }
    }
}

// ── Coordinator harness ─────────────────────────────────────────

pub struct Harness {
    pub pool: SqlitePool,
    pub queue: QueueManager,
    pub connectivity: Connectivity,
    pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
    pub async fn new(capabilities: Vec<Arc<FakeCapability>>, online: bool) -> Self {
        Self::with_settings(capabilities, online, test_settings()).await
    }

    pub async fn with_settings(
        capabilities: Vec<Arc<FakeCapability>>,
        online: bool,
        settings: SyncSettings,
    ) -> Self {
        let pool = memory_pool().await;
        let queue = QueueManager::new(pool.clone());
        let connectivity = Connectivity::new(online);

        let mut registry = CapabilityRegistry::new();
        for capability in capabilities {
            registry.register(capability);
        }

        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            Arc::new(registry),
            connectivity.clone(),
            settings,
        ));

        Self {
            pool,
            queue,
            connectivity,
            coordinator,
        }
    }

    pub async fn enqueue(&self, action_type: ActionType, payload: Value) -> Uuid {
        self.queue
            .enqueue(action_type, payload, None)
            .await
            .expect("enqueue failed")
    }
}

/// Everything already sitting in the receiver.
pub fn collect_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn event_names(events: &[SyncEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Fake upstream club platform ─────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub body: Value,
    pub tenant_id: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Default)]
pub struct UpstreamState {
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub fail_sends: AtomicBool,
    pub fail_lists: AtomicBool,
    next_id: AtomicUsize,
}

impl UpstreamState {
    fn record(&self, path: String, headers: &HeaderMap, body: Value) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            path,
            body,
            tenant_id: header("x-tenant-id"),
            idempotency_key: header("idempotency-key"),
        });
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct FakeUpstream {
    pub addr: SocketAddr,
    pub state: Arc<UpstreamState>,
}

impl FakeUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

type Upstream = State<Arc<UpstreamState>>;

async fn upstream_create_member(
    State(state): Upstream,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("/api/v1/members".into(), &headers, body.clone());
    let mut member = body;
    member["id"] = json!(state.next_id("mem"));
    Json(member)
}

async fn upstream_list_members(State(state): Upstream) -> (StatusCode, Json<Value>) {
    if state.fail_lists.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "database unavailable" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "members": [{ "id": "mem-server", "name": "Server Member" }],
            "total": 1,
        })),
    )
}

async fn upstream_create_campaign(
    State(state): Upstream,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("/api/v1/campaigns".into(), &headers, body.clone());
    let mut campaign = body;
    campaign["id"] = json!(state.next_id("cmp"));
    Json(campaign)
}

async fn upstream_list_campaigns() -> Json<Value> {
    Json(json!({ "campaigns": [], "total": 0 }))
}

async fn upstream_send_campaign(
    State(state): Upstream,
    UrlPath(id): UrlPath<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    state.record(format!("/api/v1/campaigns/{id}/send"), &headers, Value::Null);
    if state.fail_sends.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "mail relay unavailable" })),
        );
    }
    (StatusCode::OK, Json(json!({ "id": id, "status": "sent" })))
}

pub async fn spawn_upstream() -> FakeUpstream {
    let state = Arc::new(UpstreamState::default());

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/v1/members",
            get(upstream_list_members).post(upstream_create_member),
        )
        .route(
            "/api/v1/campaigns",
            get(upstream_list_campaigns).post(upstream_create_campaign),
        )
        .route("/api/v1/campaigns/{id}/send", post(upstream_send_campaign))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind upstream");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Upstream failed");
    });

    FakeUpstream { addr, state }
}

// ── Agent under test ────────────────────────────────────────────

/// A running agent wired to a fake upstream.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub state: SharedState,
    pub upstream: FakeUpstream,
    shutdown: watch::Sender<bool>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn put(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .expect("put request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn set_online(&self, online: bool) {
        let (body, status) = self
            .put("/api/v1/connectivity", &json!({ "online": online }))
            .await;
        assert_eq!(status, StatusCode::OK, "set connectivity failed: {body}");
    }

    pub async fn pending_count(&self) -> u64 {
        self.state.queue.get_pending_actions_count().await.unwrap()
    }

    pub async fn queued_of(&self, action_type: ActionType) -> usize {
        self.state
            .queue
            .get_queued_actions_by_type(action_type)
            .await
            .unwrap()
            .len()
    }

    pub async fn wait_until_drained(&self) {
        let this = self;
        eventually("queue to drain", move || async move {
            this.pending_count().await == 0
        })
        .await;
    }

    pub async fn wait_until_none_queued(&self, action_type: ActionType) {
        let this = self;
        eventually("queued actions to sync", move || async move {
            this.queued_of(action_type).await == 0
        })
        .await;
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn the agent on a random port with a fresh in-memory queue. The
/// connectivity state is pinned to `online` so the probe never flips it.
pub async fn spawn_app(online: bool) -> TestApp {
    let upstream = spawn_upstream().await;
    let pool = memory_pool().await;

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        upstream: UpstreamConfig {
            base_url: upstream.url(),
            api_token: "test-token".to_string(),
            tenant_id: "tenant-test".to_string(),
        },
        sync: test_settings(),
        log_level: "warn".to_string(),
    };

    let api = Arc::new(
        ClubApiClient::new(
            &config.upstream.base_url,
            &config.upstream.api_token,
            &config.upstream.tenant_id,
        )
        .unwrap(),
    );
    let registry = CapabilityRegistry::standard(api.clone());
    let connectivity = Connectivity::new(online);
    connectivity.set_override(Some(online));

    let state = cellarsync::build_state(pool, config, api, registry, connectivity);

    let (shutdown, shutdown_rx) = watch::channel(false);
    cellarsync::spawn_background(&state, shutdown_rx);

    let app = cellarsync::build_app(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        state,
        upstream,
        shutdown,
    }
}
