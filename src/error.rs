//! Top-level application error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::cache::{ClassifyError, LifecycleError, StoreError};
use crate::config::LoadError;
use crate::net::FetchError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Telemetry(_) | AppError::Classify(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Store(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Lifecycle(LifecycleError::NotInstalled(_)) => StatusCode::CONFLICT,
            AppError::Lifecycle(_) => StatusCode::BAD_GATEWAY,
            AppError::Fetch(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Config(_) => "Service misconfigured",
            AppError::Telemetry(_) => "Logging subsystem could not start",
            AppError::Classify(_) => "Asset rules could not be compiled",
            AppError::Store(_) | AppError::Io(_) => "Cache storage failure",
            AppError::Lifecycle(LifecycleError::NotInstalled(_)) => {
                "No generation installed to activate"
            }
            AppError::Lifecycle(_) => "Generation lifecycle failure",
            AppError::Fetch(_) => "Upstream fetch failure",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), self.presentation_message()).into_response()
    }
}
