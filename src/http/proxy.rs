//! The intercepting proxy handler.
//!
//! Classified requests run through the fetch orchestrator and may be served
//! from cache; everything else is forwarded to the origin verbatim.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{EntryKey, FetchOutcome, UNAVAILABLE_REASON};
use crate::net::FetchedResponse;

use super::ProxyState;

/// Headers that describe the hop, not the payload; never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &["connection", "transfer-encoding", "keep-alive"];

/// Fallback handler for every non-control route.
pub async fn intercept(State(state): State<ProxyState>, request: Request) -> Response {
    let method = request.method().clone();
    let target = origin_target(&state.origin, &request);

    if state.classifier.is_cacheable(&method, &target) {
        let outcome = state.orchestrator.fetch(&EntryKey::get(target.as_str())).await;
        return outcome_response(outcome);
    }

    debug!(method = %method, url = %target, "passing through");
    passthrough(&state, method.as_str(), &target, request).await
}

/// Rebase the incoming request path and query onto the upstream origin.
fn origin_target(origin: &Url, request: &Request) -> Url {
    let mut target = origin.clone();
    target.set_path(request.uri().path());
    target.set_query(request.uri().query());
    target
}

async fn passthrough(
    state: &ProxyState,
    method: &str,
    target: &Url,
    request: Request,
) -> Response {
    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(error = %error, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
        }
    };

    match state.fetcher.forward(method, target.as_str(), body).await {
        Ok(response) => build_response(&response),
        Err(error) => {
            warn!(
                url = %target,
                error = %error,
                "origin forward failed"
            );
            (StatusCode::BAD_GATEWAY, "origin unreachable").into_response()
        }
    }
}

fn outcome_response(outcome: FetchOutcome) -> Response {
    match outcome {
        FetchOutcome::Fresh(entry) | FetchOutcome::Stale(entry) => build_response(
            &FetchedResponse {
                status: entry.status,
                headers: entry.headers,
                body: entry.body,
            },
        ),
        FetchOutcome::Network(response) => build_response(&response),
        FetchOutcome::Unavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            UNAVAILABLE_REASON,
        )
            .into_response(),
    }
}

/// Translate a fetched response into an axum response, dropping hop-by-hop
/// headers and anything that fails header validation.
fn build_response(fetched: &FetchedResponse) -> Response {
    let status =
        StatusCode::from_u16(fetched.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Response::new(Body::from(fetched.body.clone()));
    *response.status_mut() = status;

    for (name, value) in &fetched.headers {
        if HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(_) => continue,
        };
        let value = match HeaderValue::from_str(value) {
            Ok(value) => value,
            Err(_) => continue,
        };
        response.headers_mut().insert(name, value);
    }

    response
}
