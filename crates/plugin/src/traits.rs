//! Plugin contracts for the four extension points.
//!
//! Plugins are constructed by registry factories with their structured
//! config, then `init` is called once before first use and `shutdown`
//! once at unload. All methods take `&self`; a plugin that needs
//! mutable state owns its own interior mutability (push handlers may
//! be invoked concurrently).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use relay_core::event::Event;
use relay_core::record::LogRecord;

use crate::context::TransformContext;
use crate::error::PluginError;

// ── Sources ─────────────────────────────────────────────────────────

/// Result of one poll cycle.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub events: Vec<Event>,
    /// Replaces the stored checkpoint when present. `None` leaves the
    /// prior checkpoint untouched.
    pub checkpoint: Option<String>,
}

impl PollOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// External origin of events.
///
/// Pull sources implement `poll`; push-capable sources additionally
/// expose a handler via `as_push`. Capability is introspected, never
/// guessed.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    async fn init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// One poll cycle. `checkpoint` is the value stored after the last
    /// successful poll, absent on bootstrap; its meaning is owned by
    /// the plugin.
    async fn poll(&self, checkpoint: Option<&str>) -> Result<PollOutcome, PluginError>;

    /// The push capability, when this source accepts inbound webhooks.
    fn as_push(&self) -> Option<&dyn PushHandler> {
        None
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn SourcePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn SourcePlugin>")
    }
}

/// An inbound webhook request, decoupled from the HTTP stack.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// What the plugin wants written back, plus the events to publish.
#[derive(Debug)]
pub struct PushResponse {
    pub status: u16,
    pub body: Value,
    pub events: Vec<Event>,
}

impl PushResponse {
    /// 200 with the published event ids in the body.
    pub fn accepted(events: Vec<Event>) -> Self {
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        let body = serde_json::json!({ "event_ids": ids });
        Self {
            status: 200,
            body,
            events,
        }
    }
}

#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Non-POST methods are refused with 405 unless the plugin opts in.
    fn accepts_method(&self, method: &str) -> bool {
        method.eq_ignore_ascii_case("POST")
    }

    /// May validate signatures, authenticate, and produce zero or more
    /// events. Concurrent invocations are allowed; thread-safety is the
    /// plugin's responsibility.
    async fn handle(&self, request: PushRequest) -> Result<PushResponse, PluginError>;
}

// ── Actors ──────────────────────────────────────────────────────────

/// Resolved per-route delivery configuration.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub route: String,
    /// The route's `with` map, opaque to the router.
    pub with: serde_json::Map<String, Value>,
    /// Contents of the route's launch-prompt file, when configured.
    pub prompt: Option<String>,
}

/// External recipient of events.
///
/// `Ok(())` means delivered. Errors are classified by kind: `rejected`
/// and `validation` are terminal for the event, `transient` is retried
/// with bounded backoff, `fatal` fails without retry.
#[async_trait]
pub trait ActorPlugin: Send + Sync {
    async fn init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn deliver(&self, event: &Event, delivery: &Delivery) -> Result<(), PluginError>;

    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

// ── Transforms ──────────────────────────────────────────────────────

/// A transform either passes an event on (possibly modified) or drops
/// it for the current route.
#[derive(Debug)]
pub enum TransformOutcome {
    Event(Event),
    Drop,
}

#[async_trait]
pub trait TransformPlugin: Send + Sync {
    async fn init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Runs with an owned copy of the event; other routes see the
    /// pre-pipeline event regardless of what happens here.
    async fn execute(
        &self,
        event: Event,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, PluginError>;

    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

// ── Loggers ─────────────────────────────────────────────────────────

/// Passive observer of pipeline-phase records. A failing logger is
/// isolated by the logger manager and never affects event flow.
#[async_trait]
pub trait LoggerPlugin: Send + Sync {
    async fn init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn log(&self, record: &LogRecord) -> Result<(), PluginError>;

    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
