//! Event envelope — the sole message type on the bus.
//!
//! Events are stamped with a collision-resistant id at construction and
//! with a trace id at ingress (by the source driver, before any matcher
//! runs). Transforms receive an owned copy and may rewrite provenance
//! and payload; identity fields stay with the envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Closed set of routable event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "resource.changed")]
    ResourceChanged,
    #[serde(rename = "actor.stopped")]
    ActorStopped,
    #[serde(rename = "message.received")]
    MessageReceived,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ResourceChanged => "resource.changed",
            EventType::ActorStopped => "actor.stopped",
            EventType::MessageReceived => "message.received",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a fresh event id (`evt_` + 128 bits of hex entropy).
pub fn new_event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

/// Generate a fresh trace id (`trc_` + 128 bits of hex entropy).
pub fn new_trace_id() -> String {
    format!("trc_{}", Uuid::new_v4().simple())
}

/// The atomic unit of routing.
///
/// `provenance` holds flat string/scalar keys describing the external
/// origin (platform, sub-event kind, author, url, ...); `payload` is
/// connector-specific and free-form. Both are visible to matchers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Opaque unique id, `evt_`-prefixed.
    pub id: String,

    /// Wall clock at emission. Monotonic ordering is not guaranteed.
    pub timestamp: DateTime<Utc>,

    /// Configured source identifier (not the connector kind). The source
    /// driver enforces the configured value regardless of what a plugin
    /// proposes.
    pub source_id: String,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Assigned on ingress, `trc_`-prefixed. Present before the first
    /// matcher runs; propagated to all logs and follow-on events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provenance: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Build an event, stamping id and timestamp. No network I/O.
    pub fn new(source_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            id: new_event_id(),
            timestamp: Utc::now(),
            source_id: source_id.into(),
            event_type,
            trace_id: None,
            provenance: Map::new(),
            payload: Map::new(),
        }
    }

    pub fn with_provenance(mut self, provenance: Map<String, Value>) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Stamp a trace id, replacing any prior value.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// The trace id, or `""` when not yet stamped (logs only; drivers
    /// stamp before publish).
    pub fn trace(&self) -> &str {
        self.trace_id.as_deref().unwrap_or("")
    }

    /// Resolve a dot-separated path against `{provenance, payload}`.
    ///
    /// The first segment selects the section; the rest walk nested
    /// objects. A missing segment resolves to `None`.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let root = match segments.next()? {
            "provenance" => &self.provenance,
            "payload" => &self.payload,
            _ => return None,
        };

        let first = segments.next()?;
        let mut current = root.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}
