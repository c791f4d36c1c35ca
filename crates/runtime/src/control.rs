//! Control API: loopback HTTP surface for a running runtime.
//!
//! Other process instances of the CLI find the port via
//! `<state_dir>/runtime.port` and drive load/unload/reload/status/
//! shutdown without touching runtime internals.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use relay_core::config::ModuleConfig;

use crate::error::RuntimeError;
use crate::runtime::{ModuleBrief, RuntimeInner, RuntimeStatus};

pub fn control_router(runtime: Arc<RuntimeInner>) -> Router {
    Router::new()
        .route("/control/status", get(status))
        .route("/control/module/load", post(load))
        .route("/control/module/unload", post(unload))
        .route("/control/module/reload", post(reload))
        .route("/control/shutdown", post(shutdown))
        .with_state(runtime)
}

async fn status(State(runtime): State<Arc<RuntimeInner>>) -> Json<RuntimeStatus> {
    Json(runtime.status())
}

#[derive(Debug, Deserialize)]
struct LoadRequest {
    /// Optional cross-check against `config.name`.
    #[serde(default)]
    name: Option<String>,
    config: ModuleConfig,
}

async fn load(
    State(runtime): State<Arc<RuntimeInner>>,
    Json(request): Json<LoadRequest>,
) -> Result<Json<ModuleBrief>, ApiError> {
    if let Some(name) = &request.name {
        if name != &request.config.name {
            return Err(ApiError(
                StatusCode::BAD_REQUEST,
                format!("name '{name}' does not match config.name '{}'", request.config.name),
            ));
        }
    }
    let brief = runtime.load_module(request.config).await?;
    Ok(Json(brief))
}

#[derive(Debug, Deserialize)]
struct NameRequest {
    name: String,
}

async fn unload(
    State(runtime): State<Arc<RuntimeInner>>,
    Json(request): Json<NameRequest>,
) -> Result<Json<ModuleBrief>, ApiError> {
    let brief = runtime.unload_module(&request.name).await?;
    Ok(Json(brief))
}

async fn reload(
    State(runtime): State<Arc<RuntimeInner>>,
    Json(request): Json<NameRequest>,
) -> Result<Json<ModuleBrief>, ApiError> {
    let brief = runtime.reload_module(&request.name).await?;
    Ok(Json(brief))
}

async fn shutdown(State(runtime): State<Arc<RuntimeInner>>) -> Json<serde_json::Value> {
    runtime.begin_shutdown();
    Json(json!({ "status": "shutting-down" }))
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        let status = match &e {
            RuntimeError::ModuleNotFound(_) | RuntimeError::UnknownSource(_) => {
                StatusCode::NOT_FOUND
            }
            RuntimeError::DuplicateModule(_)
            | RuntimeError::DuplicateSource { .. }
            | RuntimeError::Core(_)
            | RuntimeError::IllegalTransition { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}
