//! Generic push source for inbound webhooks.
//!
//! Validates an optional HMAC-SHA256 signature over the raw body, then
//! parses the JSON body (object or array of objects) into
//! `message.received` events. Checkpoints never apply to the push
//! path; durability for push events is plugin-local by design.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::Sha256;

use relay_core::event::{Event, EventType};
use relay_plugin::{
    PluginError, PollOutcome, PushHandler, PushRequest, PushResponse, SourcePlugin,
};

use crate::parse_config;

type HmacSha256 = Hmac<Sha256>;

fn default_signature_header() -> String {
    "x-relay-signature".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebhookSourceConfig {
    /// Shared secret for HMAC-SHA256 validation. Unsigned requests are
    /// accepted when unset.
    pub secret: Option<String>,
    /// Header carrying the hex signature, optionally `sha256=`-prefixed.
    pub signature_header: String,
    /// Extra provenance entries stamped on every event.
    pub provenance: Map<String, Value>,
}

impl Default for WebhookSourceConfig {
    fn default() -> Self {
        Self {
            secret: None,
            signature_header: default_signature_header(),
            provenance: Map::new(),
        }
    }
}

pub struct WebhookSource {
    cfg: WebhookSourceConfig,
}

impl WebhookSource {
    pub fn from_config(config: Value) -> Result<Self, PluginError> {
        Ok(Self {
            cfg: parse_config(config)?,
        })
    }

    fn verify_signature(&self, headers: &HashMap<String, String>, body: &[u8]) -> Result<(), PluginError> {
        let secret = match &self.cfg.secret {
            Some(s) => s,
            None => return Ok(()),
        };

        let wanted = self.cfg.signature_header.to_ascii_lowercase();
        let provided = headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == wanted)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| PluginError::rejected("missing signature header"))?;
        let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

        let sig = hex::decode(provided)
            .map_err(|_| PluginError::rejected("malformed signature"))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| PluginError::fatal(format!("bad HMAC key: {e}")))?;
        mac.update(body);
        mac.verify_slice(&sig)
            .map_err(|_| PluginError::rejected("invalid signature"))
    }

    fn event_from_object(&self, object: Map<String, Value>) -> Event {
        let mut provenance = self.cfg.provenance.clone();
        provenance
            .entry("platform".to_string())
            .or_insert_with(|| json!("webhook"));

        // The driver overwrites source_id with the configured value.
        Event::new("webhook", EventType::MessageReceived)
            .with_provenance(provenance)
            .with_payload(object)
    }
}

#[async_trait]
impl SourcePlugin for WebhookSource {
    /// Push-only: a scheduled poll finds nothing to pull.
    async fn poll(&self, _checkpoint: Option<&str>) -> Result<PollOutcome, PluginError> {
        Ok(PollOutcome::empty())
    }

    fn as_push(&self) -> Option<&dyn PushHandler> {
        Some(self)
    }
}

#[async_trait]
impl PushHandler for WebhookSource {
    async fn handle(&self, request: PushRequest) -> Result<PushResponse, PluginError> {
        self.verify_signature(&request.headers, &request.body)?;

        let parsed: Value = serde_json::from_slice(&request.body)
            .map_err(|e| PluginError::validation(format!("body is not JSON: {e}")))?;

        let events = match parsed {
            Value::Object(object) => vec![self.event_from_object(object)],
            Value::Array(items) => {
                let mut events = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(object) => events.push(self.event_from_object(object)),
                        other => {
                            return Err(PluginError::validation(format!(
                                "array items must be objects, got {other}"
                            )))
                        }
                    }
                }
                events
            }
            other => {
                return Err(PluginError::validation(format!(
                    "body must be an object or array, got {other}"
                )))
            }
        };

        Ok(PushResponse::accepted(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &[u8], headers: &[(&str, &str)]) -> PushRequest {
        PushRequest {
            method: "POST".to_string(),
            path: "/hooks/inbox".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_vec(),
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn unsigned_source_accepts_plain_json() {
        let source = WebhookSource::from_config(Value::Null).unwrap();
        let handler = source.as_push().unwrap();
        let response = handler
            .handle(request(br#"{"hello": "world"}"#, &[]))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.events.len(), 1);
        assert_eq!(response.events[0].event_type, EventType::MessageReceived);
        assert_eq!(response.events[0].payload["hello"], json!("world"));
        assert_eq!(response.body["event_ids"][0], json!(response.events[0].id));
    }

    #[tokio::test]
    async fn array_body_yields_one_event_each() {
        let source = WebhookSource::from_config(Value::Null).unwrap();
        let handler = source.as_push().unwrap();
        let response = handler
            .handle(request(br#"[{"n": 1}, {"n": 2}]"#, &[]))
            .await
            .unwrap();
        assert_eq!(response.events.len(), 2);
    }

    #[tokio::test]
    async fn valid_signature_passes() {
        let source =
            WebhookSource::from_config(json!({ "secret": "s3cret" })).unwrap();
        let body = br#"{"ok": true}"#;
        let sig = sign("s3cret", body);
        let response = source
            .as_push()
            .unwrap()
            .handle(request(body, &[("X-Relay-Signature", &sig)]))
            .await
            .unwrap();
        assert_eq!(response.events.len(), 1);
    }

    #[tokio::test]
    async fn sha256_prefix_is_accepted() {
        let source =
            WebhookSource::from_config(json!({ "secret": "s3cret" })).unwrap();
        let body = br#"{"ok": true}"#;
        let sig = format!("sha256={}", sign("s3cret", body));
        assert!(source
            .as_push()
            .unwrap()
            .handle(request(body, &[("x-relay-signature", &sig)]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let source =
            WebhookSource::from_config(json!({ "secret": "s3cret" })).unwrap();
        let body = br#"{"ok": true}"#;
        let sig = sign("wrong-secret", body);
        let err = source
            .as_push()
            .unwrap()
            .handle(request(body, &[("x-relay-signature", &sig)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, relay_core::error::ErrorKind::Rejected);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let source =
            WebhookSource::from_config(json!({ "secret": "s3cret" })).unwrap();
        let err = source
            .as_push()
            .unwrap()
            .handle(request(br#"{}"#, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, relay_core::error::ErrorKind::Rejected);
    }

    #[tokio::test]
    async fn non_json_body_is_validation_error() {
        let source = WebhookSource::from_config(Value::Null).unwrap();
        let err = source
            .as_push()
            .unwrap()
            .handle(request(b"not json", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, relay_core::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn poll_is_a_no_op() {
        let source = WebhookSource::from_config(Value::Null).unwrap();
        let outcome = source.poll(None).await.unwrap();
        assert!(outcome.events.is_empty());
        assert!(outcome.checkpoint.is_none());
    }
}
