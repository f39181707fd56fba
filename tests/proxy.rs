use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use bytes::Bytes;
use dispensa::cache::{
    CacheConfig, CacheStore, Classifier, CurrentGeneration, FetchOrchestrator, LifecycleManager,
    MemoryStore, Revalidator,
};
use dispensa::clock::{Clock, ManualClock};
use dispensa::http::{ProxyState, router};
use dispensa::net::{FetchError, FetchedResponse, Fetcher};
use http_body_util::BodyExt;
use tower::ServiceExt;
use url::Url;

const ORIGIN: &str = "https://origin.test";

/// Records every origin interaction; `forward` calls are tagged so tests can
/// tell the cache path and the passthrough path apart.
#[derive(Default)]
struct StubFetcher {
    bodies: Mutex<HashMap<String, (u16, &'static [u8])>>,
    down: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    fn respond(&self, url: &str, status: u16, body: &'static [u8]) {
        self.bodies
            .lock()
            .expect("bodies lock")
            .insert(url.to_string(), (status, body));
    }

    fn set_down(&self, down: bool) {
        *self.down.lock().expect("down lock") = down;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn lookup(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        if *self.down.lock().expect("down lock") {
            return Err(FetchError::Unreachable("stub outage".to_string()));
        }
        match self.bodies.lock().expect("bodies lock").get(url) {
            Some((status, body)) => Ok(FetchedResponse {
                status: *status,
                headers: vec![("content-type".to_string(), "text/plain".to_string())],
                body: Bytes::from_static(body),
            }),
            None => Ok(FetchedResponse {
                status: 404,
                headers: Vec::new(),
                body: Bytes::new(),
            }),
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.calls.lock().expect("calls lock").push(url.to_string());
        self.lookup(url)
    }

    async fn forward(
        &self,
        method: &str,
        url: &str,
        _body: Bytes,
    ) -> Result<FetchedResponse, FetchError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("forward {method} {url}"));
        self.lookup(url)
    }
}

struct Harness {
    app: Router,
    fetcher: Arc<StubFetcher>,
    clock: Arc<ManualClock>,
    lifecycle: Arc<LifecycleManager>,
    store: Arc<MemoryStore>,
}

fn harness(critical: &[&str]) -> Harness {
    let config = CacheConfig {
        critical_assets: critical.iter().map(|s| s.to_string()).collect(),
        revalidation_assets: critical.iter().map(|s| s.to_string()).collect(),
        freshness_window: Duration::from_millis(1000),
        ..CacheConfig::default()
    };

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StubFetcher::default());
    let clock = Arc::new(ManualClock::at_epoch());
    let current = Arc::new(CurrentGeneration::new(config.generation.clone()));

    let classifier = Arc::new(Classifier::from_config(&config).expect("rules compile"));
    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&store) as Arc<dyn CacheStore>,
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        config.clone(),
        Arc::clone(&current),
    ));
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::clone(&store) as Arc<dyn CacheStore>,
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&current),
        config.freshness_window,
    ));
    let revalidator = Arc::new(Revalidator::new(
        Arc::clone(&store) as Arc<dyn CacheStore>,
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&current),
        config.revalidation_assets.clone(),
    ));

    let state = ProxyState {
        classifier,
        orchestrator,
        lifecycle: Arc::clone(&lifecycle),
        revalidator,
        fetcher: Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        store: Arc::clone(&store) as Arc<dyn CacheStore>,
        current,
        origin: Url::parse(ORIGIN).expect("origin URL"),
    };

    Harness {
        app: router(state),
        fetcher,
        clock,
        lifecycle,
        store,
    }
}

async fn send(app: &Router, method: Method, path: &str) -> (StatusCode, Bytes) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("infallible service");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    (status, body)
}

#[tokio::test]
async fn classified_get_is_served_from_cache_on_repeat() {
    let h = harness(&[]);
    h.fetcher
        .respond("https://origin.test/app.js", 200, b"console.log(1)");

    let (status, body) = send(&h.app, Method::GET, "/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"console.log(1)"));
    assert_eq!(h.fetcher.calls().len(), 1);

    // Second request inside the freshness window: byte-identical, no new
    // origin traffic.
    let (status, body) = send(&h.app, Method::GET, "/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"console.log(1)"));
    assert_eq!(h.fetcher.calls().len(), 1);
}

#[tokio::test]
async fn expired_entry_is_refetched() {
    let h = harness(&[]);
    h.fetcher.respond("https://origin.test/style.css", 200, b"v1");

    send(&h.app, Method::GET, "/style.css").await;

    h.fetcher.respond("https://origin.test/style.css", 200, b"v2");
    h.clock.set_ms(1500);

    let (status, body) = send(&h.app, Method::GET, "/style.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"v2"));
    assert_eq!(h.fetcher.calls().len(), 2);
}

#[tokio::test]
async fn unclassified_requests_pass_through() {
    let h = harness(&[]);
    h.fetcher
        .respond("https://origin.test/page.html", 200, b"<html>");
    h.fetcher
        .respond("https://origin.test/app.js", 200, b"body");

    let (status, body) = send(&h.app, Method::GET, "/page.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"<html>"));

    // Cacheable path but non-GET method: also passthrough.
    let (status, _) = send(&h.app, Method::POST, "/app.js").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        h.fetcher.calls(),
        vec![
            "forward GET https://origin.test/page.html".to_string(),
            "forward POST https://origin.test/app.js".to_string(),
        ]
    );
}

#[tokio::test]
async fn passthrough_preserves_query_strings() {
    let h = harness(&[]);
    h.fetcher
        .respond("https://origin.test/search?q=cache", 200, b"results");

    let (status, body) = send(&h.app, Method::GET, "/search?q=cache").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"results"));
}

#[tokio::test]
async fn stale_entry_is_served_when_the_origin_is_down() {
    let h = harness(&[]);
    h.fetcher.respond("https://origin.test/app.js", 200, b"old");

    send(&h.app, Method::GET, "/app.js").await;

    // Long past expiry and the origin is gone.
    h.clock.set_ms(1_000_000);
    h.fetcher.set_down(true);

    let (status, body) = send(&h.app, Method::GET, "/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"old"));
}

#[tokio::test]
async fn origin_outage_without_entry_yields_503() {
    let h = harness(&[]);
    h.fetcher.set_down(true);

    let (status, body) = send(&h.app, Method::GET, "/app.js").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, Bytes::from_static(b"unavailable"));
}

#[tokio::test]
async fn passthrough_outage_yields_502() {
    let h = harness(&[]);
    h.fetcher.set_down(true);

    let (status, _) = send(&h.app, Method::GET, "/page.html").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn status_endpoint_reports_lifecycle_position() {
    let h = harness(&[]);
    h.store.open("v1").await.expect("open");

    let (status, body) = send(&h.app, Method::GET, "/_dispensa/status").await;
    assert_eq!(status, StatusCode::OK);

    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("status JSON");
    assert_eq!(parsed["current_generation"], "v1");
    assert_eq!(parsed["state"], "pending");
    assert_eq!(parsed["generations"][0], "v1");
}

#[tokio::test]
async fn skip_waiting_activates_an_installed_generation() {
    let h = harness(&["https://origin.test/app.js"]);
    h.fetcher.respond("https://origin.test/app.js", 200, b"body");

    h.lifecycle.install().await.expect("install");
    // Seed an older generation that activation must delete.
    h.store.open("v0").await.expect("open");

    let (status, body) = send(&h.app, Method::POST, "/_dispensa/skip-waiting").await;
    assert_eq!(status, StatusCode::OK);

    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("status JSON");
    assert_eq!(parsed["state"], "active");
    assert_eq!(
        h.store.list_generations().await.expect("list"),
        vec!["v1".to_string()]
    );
}

#[tokio::test]
async fn revalidate_endpoint_runs_a_pass_and_reports() {
    let h = harness(&["https://origin.test/app.js", "https://origin.test/gone.js"]);
    h.fetcher.respond("https://origin.test/app.js", 200, b"body");
    // gone.js is unscripted: the stub answers 404.

    let (status, body) = send(&h.app, Method::POST, "/_dispensa/revalidate").await;
    assert_eq!(status, StatusCode::OK);

    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("report JSON");
    assert_eq!(parsed["refreshed"], 1);
    assert_eq!(parsed["failed"], 1);
}
