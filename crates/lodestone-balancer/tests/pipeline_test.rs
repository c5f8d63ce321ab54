//! End-to-end pipeline tests against mock origin servers.
//!
//! Each test spins up one or more axum origins on OS-assigned ports, builds
//! a balancer over them, and drives requests straight through
//! `LoadBalancer::handle`.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lodestone_balancer::rollout::RolloutConfig;
use lodestone_balancer::LoadBalancer;
use lodestone_common::config::{
    CircuitBreakerSettings, Config, Frontend, RateLimitAlgorithm, RateLimitSettings,
};
use lodestone_common::shutdown::Shutdown;
use lodestone_metrics::Metrics;

// ============================================================================
// Mock origin server
// ============================================================================

/// An origin that echoes request details and counts hits.
struct MockOrigin {
    addr: SocketAddr,
    hits: Arc<AtomicU64>,
}

impl MockOrigin {
    async fn spawn() -> Self {
        use axum::extract::State;
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::routing::get;
        use axum::{Json, Router};

        let hits: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));

        async fn echo(
            State(hits): State<Arc<AtomicU64>>,
            req: axum::extract::Request,
        ) -> impl IntoResponse {
            hits.fetch_add(1, Ordering::SeqCst);
            let (parts, body) = req.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            let echoed = json!({
                "method": parts.method.as_str(),
                "path": parts.uri.path(),
                "query": parts.uri.query(),
                "host": parts.headers.get("host").and_then(|v| v.to_str().ok()),
                "probe": parts.headers.get("x-probe").and_then(|v| v.to_str().ok()),
                "body": String::from_utf8_lossy(&body),
            });
            ([("x-origin-version", "7")], Json(echoed))
        }

        async fn boom() -> StatusCode {
            StatusCode::INTERNAL_SERVER_ERROR
        }

        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(1)).await;
            "late"
        }

        async fn missing() -> StatusCode {
            StatusCode::NOT_FOUND
        }

        let app = Router::new()
            .route("/boom", get(boom))
            .route("/slow", get(slow))
            .route("/missing", get(missing))
            .fallback(echo)
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, hits }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }
}

fn base_config(backends: Vec<String>) -> Config {
    Config {
        frontends: vec![Frontend { port: 8080 }],
        backends,
        healthcheck: Default::default(),
        ssl: None,
        ratelimit: Default::default(),
        circuitbreaker: Default::default(),
        metrics: Default::default(),
    }
}

fn balancer(config: Config) -> LoadBalancer {
    LoadBalancer::new(config, Arc::new(Metrics::new())).unwrap()
}

fn request(method: &str, uri: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn body_of(response: lodestone_balancer::proxy::ProxyResponse) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn test_forward_preserves_method_path_query_and_body() {
    let origin = MockOrigin::spawn().await;
    let lb = balancer(base_config(vec![origin.url()]));

    let req = Request::builder()
        .method("POST")
        .uri("/users/42?page=2&sort=asc")
        .header("x-probe", "abc")
        .body(Full::new(Bytes::from("request payload")))
        .unwrap();

    let response = lb.handle(req).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("x-origin-version").unwrap(), "7");

    let echoed: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/users/42");
    assert_eq!(echoed["query"], "page=2&sort=asc");
    assert_eq!(echoed["probe"], "abc");
    assert_eq!(echoed["body"], "request payload");
    // Host is rewritten to the origin
    assert_eq!(echoed["host"], origin.addr.to_string());
}

#[tokio::test]
async fn test_non_5xx_status_passes_through() {
    let origin = MockOrigin::spawn().await;
    let lb = balancer(base_config(vec![origin.url()]));

    let response = lb.handle(request("GET", "/missing")).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_empty_backend_set_is_503() {
    let lb = balancer(base_config(vec![]));
    let response = lb.handle(request("GET", "/")).await;
    assert_eq!(response.status(), 503);
    assert_eq!(&body_of(response).await[..], b"No available backends");
}

// ============================================================================
// Distribution
// ============================================================================

#[tokio::test]
async fn test_weighted_distribution_across_origins() {
    let a = MockOrigin::spawn().await;
    let b = MockOrigin::spawn().await;
    let lb = balancer(base_config(vec![a.url(), b.url()]));
    lb.update_backend_weight("backend-0", 3).await;

    for _ in 0..20 {
        let response = lb.handle(request("GET", "/")).await;
        assert_eq!(response.status(), 200);
    }

    assert_eq!(a.hits(), 15);
    assert_eq!(b.hits(), 5);
}

// ============================================================================
// Failure classification
// ============================================================================

#[tokio::test]
async fn test_500_origin_trips_breaker_to_503() {
    let origin = MockOrigin::spawn().await;
    let mut config = base_config(vec![origin.url()]);
    config.circuitbreaker = CircuitBreakerSettings {
        threshold: 2,
        timeout: Duration::from_secs(60),
        max_half_open: 1,
    };
    let lb = balancer(config);

    // upstream 500s map to 502 until the breaker trips
    for _ in 0..2 {
        let response = lb.handle(request("GET", "/boom")).await;
        assert_eq!(response.status(), 502);
        assert_eq!(&body_of(response).await[..], b"Backend error");
    }

    // breaker is open now: fail fast with 503
    let response = lb.handle(request("GET", "/boom")).await;
    assert_eq!(response.status(), 503);
    assert_eq!(&body_of(response).await[..], b"Service temporarily unavailable");
}

#[tokio::test]
async fn test_breaker_recovers_through_half_open() {
    let origin = MockOrigin::spawn().await;
    let mut config = base_config(vec![origin.url()]);
    config.circuitbreaker = CircuitBreakerSettings {
        threshold: 1,
        timeout: Duration::from_millis(100),
        max_half_open: 1,
    };
    let lb = balancer(config);

    assert_eq!(lb.handle(request("GET", "/boom")).await.status(), 502);
    assert_eq!(lb.handle(request("GET", "/")).await.status(), 503);

    tokio::time::sleep(Duration::from_millis(150)).await;

    // probe admitted, succeeds, circuit closes
    assert_eq!(lb.handle(request("GET", "/")).await.status(), 200);
    assert_eq!(lb.handle(request("GET", "/")).await.status(), 200);
}

#[tokio::test]
async fn test_exhausted_rate_limiter_is_429() {
    let origin = MockOrigin::spawn().await;
    let mut config = base_config(vec![origin.url()]);
    config.ratelimit = RateLimitSettings {
        enabled: true,
        rate: 2.0,
        burst: 2.0,
        algorithm: RateLimitAlgorithm::TokenBucket,
    };
    let lb = balancer(config);

    assert_eq!(lb.handle(request("GET", "/")).await.status(), 200);
    assert_eq!(lb.handle(request("GET", "/")).await.status(), 200);

    let response = lb.handle(request("GET", "/")).await;
    assert_eq!(response.status(), 429);
    assert_eq!(&body_of(response).await[..], b"Too many requests");
}

#[tokio::test]
async fn test_slow_origin_is_504() {
    let origin = MockOrigin::spawn().await;
    let lb = balancer(base_config(vec![origin.url()]))
        .with_upstream_timeout(Duration::from_millis(100));

    let response = lb.handle(request("GET", "/slow")).await;
    assert_eq!(response.status(), 504);
    assert_eq!(&body_of(response).await[..], b"Gateway timeout");
}

#[tokio::test]
async fn test_connection_refused_is_502() {
    let lb = balancer(base_config(vec!["http://127.0.0.1:1".to_string()]));
    let response = lb.handle(request("GET", "/")).await;
    assert_eq!(response.status(), 502);
}

// ============================================================================
// Metrics side effects
// ============================================================================

#[tokio::test]
async fn test_pipeline_updates_metrics() {
    let origin = MockOrigin::spawn().await;
    let metrics = Arc::new(Metrics::new());
    let lb = LoadBalancer::new(base_config(vec![origin.url()]), metrics.clone()).unwrap();

    lb.handle(request("GET", "/")).await;
    lb.handle(request("GET", "/boom")).await;

    assert_eq!(metrics.requests_total.get(), 2.0);
    assert_eq!(metrics.errors_total.get(), 1.0);
    assert_eq!(metrics.response_time.get_sample_count(), 1);
    assert_eq!(metrics.active_connections.get(), 0.0);
}

// ============================================================================
// Reconfiguration under traffic
// ============================================================================

#[tokio::test]
async fn test_rollout_shifts_live_traffic() {
    let old = MockOrigin::spawn().await;
    let new = MockOrigin::spawn().await;
    let lb = Arc::new(balancer(base_config(vec![old.url()])));
    let shutdown = Shutdown::new();

    assert_eq!(lb.handle(request("GET", "/")).await.status(), 200);
    assert_eq!(old.hits(), 1);

    lb.rollout(
        &shutdown.handle(),
        RolloutConfig {
            new_backends: vec![new.url()],
            batch_size: 1,
            interval: Duration::from_millis(10),
        },
    )
    .await
    .unwrap();

    for _ in 0..3 {
        assert_eq!(lb.handle(request("GET", "/")).await.status(), 200);
    }
    assert_eq!(old.hits(), 1);
    assert_eq!(new.hits(), 3);
}
