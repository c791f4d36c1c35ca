//! Webhook ingress: one HTTP server, endpoints grouped by source id.
//!
//! Requests to `/hooks/{source_id}` are matched to a registered
//! push-capable source driver. The handler reads the body up to the
//! configured cap, hands method/headers/raw body to the plugin, and
//! maps plugin errors: validation/rejected → 4xx, anything else → 500.
//! Concurrent requests to the same source are allowed; publish order
//! across them is unspecified.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, warn};

use relay_core::error::ErrorKind;
use relay_plugin::PushRequest;

use crate::source::SourceDriver;

#[derive(Clone)]
pub struct WebhookIngress {
    targets: Arc<RwLock<HashMap<String, Arc<SourceDriver>>>>,
    max_body_bytes: usize,
}

impl WebhookIngress {
    pub fn new(max_body_bytes: usize) -> Self {
        Self {
            targets: Arc::new(RwLock::new(HashMap::new())),
            max_body_bytes,
        }
    }

    /// Register a push-capable source. Non-push drivers are ignored.
    pub fn register(&self, driver: Arc<SourceDriver>) {
        if !driver.is_push() {
            return;
        }
        debug!(source_id = %driver.id(), "webhook endpoint registered");
        self.targets
            .write()
            .expect("ingress targets lock poisoned")
            .insert(driver.id().to_string(), driver);
    }

    pub fn deregister(&self, source_id: &str) {
        self.targets
            .write()
            .expect("ingress targets lock poisoned")
            .remove(source_id);
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/hooks/{source_id}", any(handle_hook))
            .with_state(self.clone())
    }
}

async fn handle_hook(
    State(ingress): State<WebhookIngress>,
    Path(source_id): Path<String>,
    request: Request<Body>,
) -> Response {
    let driver = {
        let guard = ingress
            .targets
            .read()
            .expect("ingress targets lock poisoned");
        guard.get(&source_id).cloned()
    };
    let Some(driver) = driver else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no webhook source '{source_id}'") })),
        )
            .into_response();
    };

    let (parts, body) = request.into_parts();
    let method = parts.method.as_str().to_string();

    if !driver.push_accepts_method(&method) {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();

    let bytes = match axum::body::to_bytes(body, ingress.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": "body exceeds configured maximum" })),
            )
                .into_response();
        }
    };

    let push_request = PushRequest {
        method,
        path: parts.uri.path().to_string(),
        headers,
        body: bytes.to_vec(),
    };

    match driver.handle_push(push_request).await {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
            (status, Json(response.body)).into_response()
        }
        Err(e) => {
            warn!(source_id = %source_id, error = %e, "webhook handler failed");
            match e.kind {
                ErrorKind::Rejected | ErrorKind::Validation => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response(),
                // No event was published; the caller may retry.
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response(),
            }
        }
    }
}
