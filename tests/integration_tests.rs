use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use demofetch::error::{FetchError, ResolveError};
use demofetch::handlers::AppState;
use demofetch::rate_limit_config::{RateLimitPolicies, RateLimitPolicy};
use demofetch::resolver::{DemoUrlSource, RetryPolicy, UrlResolver};
use demofetch::shard::ShardResolver;
use demofetch::{create_app, DemoFetcher, RateLimiter};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const CODE_OK: &str = "CSGO-GADqf-jjyJ8-cSP2r-smZRo-TO2xK";
const CODE_PLAIN: &str = "CSGO-BAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
const CODE_EMPTY: &str = "CSGO-CAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
const CODE_HUGE: &str = "CSGO-DAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
const CODE_STREAM: &str = "CSGO-EAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
const CODE_MISSING: &str = "CSGO-FAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
const CODE_PENDING: &str = "CSGO-GAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
const CODE_DOWN: &str = "CSGO-HAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
const CODE_STALL: &str = "CSGO-JAAAA-AAAAA-AAAAA-AAAAA-AAAAA";

const API_KEY: &str = "test-key";
const MAX_FILE_SIZE: u64 = 1024;
const DEMO_BYTES: usize = 512;

#[derive(Clone)]
struct MockState {
    urls: Arc<HashMap<String, String>>,
    resolve_hits: Arc<AtomicUsize>,
}

struct MockServer {
    addr: SocketAddr,
    resolve_hits: Arc<AtomicUsize>,
}

impl MockServer {
    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn file_url(&self, name: &str) -> String {
        format!("http://{}/files/{}", self.addr, name)
    }
}

async fn spawn(app: Router, listener: TcpListener) {
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

async fn resolve_demo(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.resolve_hits.fetch_add(1, Ordering::SeqCst);

    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some(API_KEY) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
    }

    let sharecode = body["sharecode"].as_str().unwrap_or_default();
    match state.urls.get(sharecode) {
        Some(url) => (
            StatusCode::OK,
            Json(serde_json::json!({ "demoUrl": url, "service": "mock" })),
        ),
        None => (StatusCode::OK, Json(serde_json::json!({}))),
    }
}

fn streamed_body() -> Body {
    let chunks = (0..3).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![1u8; 600])));
    Body::from_stream(futures_util::stream::iter(chunks))
}

/// First chunk, then nothing ever again.
fn stalled_body() -> Body {
    let first = futures_util::stream::iter([Ok::<_, std::io::Error>(Bytes::from(vec![5u8; 100]))]);
    Body::from_stream(first.chain(futures_util::stream::pending()))
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        canceller.cancel();
    });
    token
}

/// One server playing both the demo URL service and the CDN.
async fn start_mock() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let file = |name: &str| format!("http://{}/files/{}", addr, name);

    let urls = HashMap::from([
        (CODE_OK.to_string(), file("ok.dem.bz2")),
        (CODE_PLAIN.to_string(), file("plain.dem")),
        (CODE_EMPTY.to_string(), file("empty.dem")),
        (CODE_HUGE.to_string(), file("huge.dem.bz2")),
        (CODE_STREAM.to_string(), file("stream.dem.bz2")),
        (CODE_MISSING.to_string(), file("missing.dem")),
        (CODE_STALL.to_string(), file("stall.dem.bz2")),
        (CODE_DOWN.to_string(), format!("{}/files/down.dem", closed_port_url().await)),
    ]);

    let state = MockState {
        urls: Arc::new(urls),
        resolve_hits: Arc::new(AtomicUsize::new(0)),
    };
    let resolve_hits = state.resolve_hits.clone();

    let app = Router::new()
        .route("/demo", post(resolve_demo))
        .route("/hang/demo", post(|| std::future::pending::<()>()))
        .route("/files/ok.dem.bz2", get(|| async { vec![7u8; DEMO_BYTES] }))
        .route("/files/plain.dem", get(|| async { vec![3u8; 100] }))
        .route("/files/empty.dem", get(|| async { Vec::<u8>::new() }))
        .route("/files/huge.dem.bz2", get(|| async { vec![0u8; 4096] }))
        .route("/files/stream.dem.bz2", get(|| async { streamed_body() }))
        .route("/files/stall.dem.bz2", get(|| async { stalled_body() }))
        .route("/s3/730/:file", get(|| async { StatusCode::OK }))
        .with_state(state);

    spawn(app, listener).await;
    MockServer { addr, resolve_hits }
}

fn resolver(base_url: Option<String>, limiter: RateLimiter) -> UrlResolver {
    UrlResolver::new(base_url, Some(API_KEY.to_string()), limiter, Duration::from_secs(5))
        .unwrap()
        .with_retry(RetryPolicy {
            retries: 2,
            delay: Duration::from_millis(10),
        })
}

fn fetcher_for(mock: &MockServer, dir: &Path) -> DemoFetcher {
    let source = resolver(Some(mock.base_url()), RateLimiter::in_memory());
    DemoFetcher::new(Arc::new(source), dir, MAX_FILE_SIZE, Duration::from_secs(10)).unwrap()
}

fn artifacts_in(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_resolver_returns_service_url() {
    let mock = start_mock().await;
    let resolver = resolver(Some(mock.base_url()), RateLimiter::in_memory());

    let demo = resolver.try_resolve(CODE_OK, None).await.unwrap();
    assert_eq!(demo.url, mock.file_url("ok.dem.bz2"));
    assert_eq!(demo.service.as_deref(), Some("mock"));
    assert_eq!(resolver.resolve(CODE_OK, None).await, Some(demo.url));
}

#[tokio::test]
async fn test_resolver_missing_field_is_not_ready() {
    let mock = start_mock().await;
    let resolver = resolver(Some(mock.base_url()), RateLimiter::in_memory());

    let result = resolver.try_resolve(CODE_PENDING, None).await;
    assert!(matches!(result, Err(ResolveError::NotReady)));
    assert!(resolver.resolve(CODE_PENDING, None).await.is_none());
    // Not ready is terminal, not retried.
    assert_eq!(mock.resolve_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_resolver_rejected_key_is_status_error() {
    let mock = start_mock().await;
    let resolver = UrlResolver::new(
        Some(mock.base_url()),
        Some("wrong".to_string()),
        RateLimiter::in_memory(),
        Duration::from_secs(5),
    )
    .unwrap();

    let result = resolver.try_resolve(CODE_OK, None).await;
    assert!(matches!(result, Err(ResolveError::Status(401))));
    assert_eq!(mock.resolve_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resolver_retries_transport_failures_twice() {
    let resolver = resolver(Some(closed_port_url().await), RateLimiter::in_memory());

    match resolver.try_resolve(CODE_OK, None).await {
        Err(ResolveError::Transport { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resolver_consumes_budget_and_waits() {
    let mock = start_mock().await;
    let limiter = RateLimiter::in_memory().with_poll_interval(Duration::from_millis(10));
    let policy = RateLimitPolicy::windowed("demo_url_service", 2, Duration::from_secs(3600));
    let resolver = resolver(Some(mock.base_url()), limiter.clone()).with_policy(policy.clone());

    // Every attempt counts, whatever its outcome.
    assert!(resolver.try_resolve(CODE_OK, None).await.is_ok());
    assert!(resolver.try_resolve(CODE_PENDING, None).await.is_err());
    assert_eq!(limiter.status(&policy).await.unwrap().remaining, 0);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = resolver.try_resolve(CODE_OK, Some(&token)).await;
    assert!(matches!(result, Err(ResolveError::Cancelled)));
    assert_eq!(mock.resolve_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_resolver_cancel_interrupts_pending_request() {
    let mock = start_mock().await;
    let resolver = UrlResolver::new(
        Some(format!("{}/hang", mock.base_url())),
        Some(API_KEY.to_string()),
        RateLimiter::in_memory(),
        Duration::from_secs(10),
    )
    .unwrap();

    let token = cancel_after(Duration::from_millis(100));
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        resolver.try_resolve(CODE_OK, Some(&token)),
    )
    .await
    .expect("cancellation must end the request");
    assert!(matches!(result, Err(ResolveError::Cancelled)));
}

#[tokio::test]
async fn test_resolver_cancel_interrupts_retry_delay() {
    let resolver = resolver(Some(closed_port_url().await), RateLimiter::in_memory()).with_retry(
        RetryPolicy {
            retries: 2,
            delay: Duration::from_secs(10),
        },
    );

    let token = cancel_after(Duration::from_millis(100));
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        resolver.try_resolve(CODE_OK, Some(&token)),
    )
    .await
    .expect("cancellation must end the retry delay");
    assert!(matches!(result, Err(ResolveError::Cancelled)));
}

#[tokio::test]
async fn test_shard_scan_resolves_responsive_url() {
    let mock = start_mock().await;
    let shards = ShardResolver::with_template(
        format!("http://{}/s{{shard}}/730", mock.addr),
        Duration::from_secs(3),
    )
    .unwrap();
    let resolver = resolver(None, RateLimiter::in_memory()).with_shard_resolver(shards);

    assert_eq!(
        resolver.resolve_by_probe(CODE_OK).await,
        Some(format!(
            "http://{}/s3/730/11240985223876039980_10304235951191282988_60633.dem.bz2",
            mock.addr
        ))
    );
    // The shard scan never touches the demo URL service.
    assert_eq!(mock.resolve_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fetch_downloads_verified_artifact() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let artifact = fetcher.try_fetch(CODE_OK, None).await.unwrap();
    assert_eq!(artifact.path, dir.path().join(format!("{}.dem.bz2", CODE_OK)));
    assert_eq!(artifact.size_bytes, DEMO_BYTES as u64);
    assert_eq!(std::fs::read(&artifact.path).unwrap(), vec![7u8; DEMO_BYTES]);
}

#[tokio::test]
async fn test_fetch_keeps_uncompressed_suffix() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let path = fetcher.fetch(CODE_PLAIN).await.unwrap();
    assert_eq!(path, dir.path().join(format!("{}.dem", CODE_PLAIN)));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
}

#[tokio::test]
async fn test_refetch_overwrites_same_artifact() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let first = fetcher.fetch(CODE_OK).await.unwrap();
    let second = fetcher.fetch(CODE_OK).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(artifacts_in(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_declared_oversize_aborts_without_artifact() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    match fetcher.try_fetch(CODE_HUGE, None).await {
        Err(FetchError::SizeExceeded { limit, observed }) => {
            assert_eq!(limit, MAX_FILE_SIZE);
            assert_eq!(observed, 4096);
        }
        other => panic!("expected size abort, got {:?}", other),
    }
    assert!(artifacts_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_undeclared_oversize_aborts_mid_stream() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    match fetcher.try_fetch(CODE_STREAM, None).await {
        Err(FetchError::SizeExceeded { limit, observed }) => {
            assert_eq!(limit, MAX_FILE_SIZE);
            assert!(observed > MAX_FILE_SIZE);
        }
        other => panic!("expected size abort, got {:?}", other),
    }
    assert!(!dir.path().join(format!("{}.dem.bz2", CODE_STREAM)).exists());
}

#[tokio::test]
async fn test_cancel_mid_download_removes_partial_file() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let token = cancel_after(Duration::from_millis(300));
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        fetcher.try_fetch(CODE_STALL, Some(&token)),
    )
    .await
    .expect("cancellation must end the download");

    assert!(matches!(result, Err(FetchError::Cancelled)));
    assert!(!dir.path().join(format!("{}.dem.bz2", CODE_STALL)).exists());
}

#[tokio::test]
async fn test_empty_download_is_removed() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let result = fetcher.try_fetch(CODE_EMPTY, None).await;
    assert!(matches!(result, Err(FetchError::IncompleteOrEmpty { bytes: 0 })));
    assert!(!dir.path().join(format!("{}.dem", CODE_EMPTY)).exists());
}

#[tokio::test]
async fn test_failed_status_leaves_nothing() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let result = fetcher.try_fetch(CODE_MISSING, None).await;
    assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    assert!(artifacts_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_unreachable_download_leaves_nothing() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let result = fetcher.try_fetch(CODE_DOWN, None).await;
    assert!(matches!(result, Err(FetchError::Transport(_))));
    assert!(artifacts_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_not_ready_is_unavailable() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    assert!(fetcher.fetch(CODE_PENDING).await.is_none());
    assert!(artifacts_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_malformed_sharecode_makes_no_request() {
    let mock = start_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&mock, dir.path());

    let result = fetcher.try_fetch("CSGO-GADqf-jjyJ8-cSP2r-smZRo", None).await;
    assert!(matches!(result, Err(FetchError::InvalidShareCode(_))));
    assert_eq!(mock.resolve_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shard_scan_finds_first_responsive_shard() {
    let mock = start_mock().await;
    let shards = ShardResolver::with_template(
        format!("http://{}/s{{shard}}/730", mock.addr),
        Duration::from_secs(3),
    )
    .unwrap();
    let decoded = demofetch::sharecode::decode(CODE_OK).unwrap();

    assert_eq!(shards.find_shard(&decoded, 1..=5).await, Ok(3));
    assert_eq!(
        shards.find_shard(&decoded, [1, 2]).await.unwrap_err().tried,
        2
    );
}

#[tokio::test]
async fn test_shard_scan_skips_unreachable_hosts() {
    let mock = start_mock().await;
    let dead = closed_port_url().await;
    let decoded = demofetch::sharecode::decode(CODE_OK).unwrap();

    // Shard 1 points at a dead host; the scan must carry on to shard 3.
    let template = format!("{}/s{{shard}}/730", dead);
    let dead_shards = ShardResolver::with_template(template, Duration::from_secs(3)).unwrap();
    assert!(dead_shards.find_shard(&decoded, [1]).await.is_err());

    let live = ShardResolver::with_template(
        format!("http://{}/s{{shard}}/730", mock.addr),
        Duration::from_secs(3),
    )
    .unwrap();
    assert_eq!(live.find_shard(&decoded, [9, 3]).await, Ok(3));
}

struct StaticSource(HashMap<String, String>);

#[async_trait]
impl DemoUrlSource for StaticSource {
    async fn resolve(&self, sharecode: &str, _: Option<&CancellationToken>) -> Option<String> {
        self.0.get(sharecode).cloned()
    }
}

/// Never hands out a URL; returns only once the caller gives up.
struct HangingSource;

#[async_trait]
impl DemoUrlSource for HangingSource {
    async fn resolve(&self, _: &str, cancel: Option<&CancellationToken>) -> Option<String> {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
        None
    }
}

fn build_app(
    dir: &Path,
    source: Arc<dyn DemoUrlSource>,
    limiter: RateLimiter,
    request_timeout: Duration,
) -> Router {
    let fetcher = DemoFetcher::new(source, dir, MAX_FILE_SIZE, Duration::from_secs(5)).unwrap();

    let state = Arc::new(AppState {
        limiter,
        policies: RateLimitPolicies {
            demo_url: RateLimitPolicy::windowed("demo_url_service", 1, Duration::from_secs(60)),
            identity: RateLimitPolicy::windowed("identity_service", 1, Duration::from_secs(300)),
            parser: RateLimitPolicy::parser_slots(1),
        },
        fetcher,
        request_timeout,
    });
    create_app(state)
}

fn test_app(dir: &Path) -> Router {
    build_app(
        dir,
        Arc::new(StaticSource(HashMap::new())),
        RateLimiter::in_memory(),
        Duration::from_secs(30),
    )
}

async fn call(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_decode_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let (status, body) = call(&app, "GET", &format!("/sharecodes/{}", CODE_OK), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["match_id"], 11240985223876039980u64);
    assert_eq!(body["token_id"], 60633);
    assert_eq!(
        body["url"],
        "https://replay1.valve.net/730/11240985223876039980_10304235951191282988_60633.dem.bz2"
    );

    let (status, body) = call(&app, "GET", "/sharecodes/CSGO-bogus", Body::empty()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_sharecode");
}

#[tokio::test]
async fn test_demo_endpoint_maps_failures() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let (status, _) = call(&app, "POST", "/demos", Body::from(r#"{"sharecode":"short"}"#)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let payload = format!(r#"{{"sharecode":"{}"}}"#, CODE_OK);
    let (status, body) = call(&app, "POST", "/demos", Body::from(payload)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "demo_unavailable");
}

#[tokio::test]
async fn test_demo_endpoint_refuses_when_budget_spent() {
    let dir = tempfile::tempdir().unwrap();
    let limiter = RateLimiter::in_memory();
    let budget = RateLimitPolicy::windowed("demo_url_service", 1, Duration::from_secs(60));
    assert!(limiter.try_acquire(&budget).await.unwrap());
    let app = build_app(
        dir.path(),
        Arc::new(HangingSource),
        limiter,
        Duration::from_secs(30),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/demos")
        .header("content-type", "application/json")
        .body(Body::from(format!(r#"{{"sharecode":"{}"}}"#, CODE_OK)))
        .unwrap();
    let response = tokio::time::timeout(Duration::from_secs(3), app.oneshot(request))
        .await
        .expect("spent budget must not queue the request")
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "60");
}

#[tokio::test]
async fn test_demo_endpoint_gives_up_at_request_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(
        dir.path(),
        Arc::new(HangingSource),
        RateLimiter::in_memory(),
        Duration::from_millis(100),
    );

    let payload = format!(r#"{{"sharecode":"{}"}}"#, CODE_OK);
    let (status, body) = tokio::time::timeout(
        Duration::from_secs(3),
        call(&app, "POST", "/demos", Body::from(payload)),
    )
    .await
    .expect("request deadline must end the fetch");

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "demo_unavailable");
    assert!(artifacts_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_limit_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let (status, body) = call(&app, "POST", "/limits/identity_service/acquire", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (status, body) = call(&app, "POST", "/limits/identity_service/acquire", Body::empty()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["retry_after"], 300);

    let (status, _) = call(&app, "POST", "/limits/parser_jobs/acquire", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, "GET", "/limits", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let identity = body
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["service"] == "identity_service")
        .unwrap();
    assert_eq!(identity["remaining"], 0);
}

#[tokio::test]
async fn test_parser_slot_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let (status, body) = call(&app, "POST", "/slots/parser/acquire", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["in_flight"], 1);

    let (status, _) = call(&app, "POST", "/slots/parser/acquire", Body::empty()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, body) = call(&app, "POST", "/slots/parser/release", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["in_flight"], 0);

    let (status, body) = call(&app, "POST", "/slots/parser/release", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let (status, body) = call(&app, "GET", "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store_connected"], true);
}
