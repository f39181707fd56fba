//! HTTP front end: the caching proxy plus its control endpoints.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use url::Url;

use crate::cache::{
    CacheStore, Classifier, CurrentGeneration, FetchOrchestrator, LifecycleManager, Revalidator,
};
use crate::net::Fetcher;

pub mod control;
pub mod proxy;

/// Shared request-handling state.
#[derive(Clone)]
pub struct ProxyState {
    pub classifier: Arc<Classifier>,
    pub orchestrator: Arc<FetchOrchestrator>,
    pub lifecycle: Arc<LifecycleManager>,
    pub revalidator: Arc<Revalidator>,
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<dyn CacheStore>,
    pub current: Arc<CurrentGeneration>,
    pub origin: Url,
}

/// Build the full router: control endpoints first, everything else falls
/// through to the proxy.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/_dispensa/skip-waiting", post(control::skip_waiting))
        .route("/_dispensa/revalidate", post(control::revalidate))
        .route("/_dispensa/status", get(control::status))
        .fallback(proxy::intercept)
        .with_state(state)
}
