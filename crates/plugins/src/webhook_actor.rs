//! Outbound webhook actor: delivers events as JSON over HTTP.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use relay_plugin::{ActorPlugin, Delivery, PluginError};
use relay_core::event::Event;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookActorConfig {
    pub url: String,
    /// HTTP method, defaults to POST.
    pub method: Option<String>,
    /// Custom headers sent on every delivery.
    pub headers: HashMap<String, String>,
}

/// Delivers `{event, with, prompt}` as a JSON payload.
///
/// Status mapping: 2xx → delivered, 4xx → rejected (no retry), 5xx and
/// network errors → transient (the driver retries with backoff).
#[derive(Debug)]
pub struct WebhookActor {
    url: String,
    method: reqwest::Method,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookActor {
    pub fn from_config(config: Value) -> Result<Self, PluginError> {
        let cfg: WebhookActorConfig =
            serde_json::from_value(config).map_err(|e| PluginError::validation(e.to_string()))?;
        if cfg.url.is_empty() {
            return Err(PluginError::validation("webhook actor requires 'url'"));
        }
        let method = match cfg.method {
            Some(m) => m
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|_| PluginError::validation(format!("invalid HTTP method: {m}")))?,
            None => reqwest::Method::POST,
        };
        Ok(Self {
            url: cfg.url,
            method,
            headers: cfg.headers,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ActorPlugin for WebhookActor {
    async fn deliver(&self, event: &Event, delivery: &Delivery) -> Result<(), PluginError> {
        let body = json!({
            "event": event,
            "with": delivery.with,
            "prompt": delivery.prompt,
        });

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .json(&body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PluginError::transient(format!("request failed: {e}")))?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(url = %self.url, %status, event_id = %event.id, "webhook delivered");
            return Ok(());
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if status.is_client_error() {
            Err(PluginError::rejected(format!("{status}: {body_text}")))
        } else {
            Err(PluginError::transient(format!("{status}: {body_text}")))
        }
    }
}
