//! Control endpoints under `/_dispensa/`.
//!
//! These replace out-of-band control messages: skip-waiting promotes a
//! waiting generation, revalidate forces a background pass, status reports
//! the lifecycle position.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::info;

use crate::cache::RevalidationReport;
use crate::error::AppError;

use super::ProxyState;

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub current_generation: String,
    pub state: &'static str,
    pub generations: Vec<String>,
}

/// POST /_dispensa/skip-waiting
pub async fn skip_waiting(
    State(state): State<ProxyState>,
) -> Result<Json<StatusBody>, AppError> {
    info!("skip-waiting requested");
    state.lifecycle.skip_waiting().await?;
    status_body(&state).await.map(Json)
}

/// POST /_dispensa/revalidate
pub async fn revalidate(State(state): State<ProxyState>) -> Json<RevalidationReport> {
    info!("manual revalidation requested");
    Json(state.revalidator.run_once().await)
}

/// GET /_dispensa/status
pub async fn status(State(state): State<ProxyState>) -> Result<Json<StatusBody>, AppError> {
    status_body(&state).await.map(Json)
}

async fn status_body(state: &ProxyState) -> Result<StatusBody, AppError> {
    let generations = state.store.list_generations().await?;
    Ok(StatusBody {
        current_generation: state.current.name(),
        state: state.lifecycle.state().as_str(),
        generations,
    })
}
