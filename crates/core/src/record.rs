//! Structured log records fanned out to logger plugins.
//!
//! One record is emitted per pipeline phase per event. Records are the
//! only user-visible error channel at the runtime boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::Event;

/// Severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Pipeline phase that produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogPhase {
    #[serde(rename = "source")]
    Source,
    #[serde(rename = "bus")]
    Bus,
    #[serde(rename = "match")]
    Match,
    #[serde(rename = "transform")]
    Transform,
    #[serde(rename = "deliver")]
    Deliver,
    #[serde(rename = "actor.lifecycle")]
    ActorLifecycle,
}

impl LogPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogPhase::Source => "source",
            LogPhase::Bus => "bus",
            LogPhase::Match => "match",
            LogPhase::Transform => "transform",
            LogPhase::Deliver => "deliver",
            LogPhase::ActorLifecycle => "actor.lifecycle",
        }
    }
}

impl std::fmt::Display for LogPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome tag carried on every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogResult {
    Ok,
    /// A matcher ran and matched nothing.
    None,
    Drop,
    Error,
    Delivered,
    Rejected,
    Retry,
    Abandoned,
}

impl LogResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogResult::Ok => "ok",
            LogResult::None => "none",
            LogResult::Drop => "drop",
            LogResult::Error => "error",
            LogResult::Delivered => "delivered",
            LogResult::Rejected => "rejected",
            LogResult::Retry => "retry",
            LogResult::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for LogResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub phase: LogPhase,
    pub module: String,
    pub result: LogResult,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl LogRecord {
    pub fn new(
        level: LogLevel,
        phase: LogPhase,
        module: impl Into<String>,
        result: LogResult,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            phase,
            module: module.into(),
            result,
            message: message.into(),
            event_id: None,
            trace_id: None,
            route: None,
            transform: None,
            actor: None,
            fields: Map::new(),
        }
    }

    /// Attach event and trace ids from an envelope.
    pub fn for_event(mut self, event: &Event) -> Self {
        self.event_id = Some(event.id.clone());
        self.trace_id = event.trace_id.clone();
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
