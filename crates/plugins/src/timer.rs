//! Timer source: one `resource.changed` event per poll cycle.
//!
//! The checkpoint is the tick counter, so restarts continue the
//! sequence instead of starting over.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use relay_core::event::{Event, EventType};
use relay_plugin::{PluginError, PollOutcome, SourcePlugin};

use crate::parse_config;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Extra provenance entries stamped on every tick event.
    pub provenance: Map<String, Value>,
}

pub struct TimerSource {
    cfg: TimerConfig,
}

impl TimerSource {
    pub fn from_config(config: Value) -> Result<Self, PluginError> {
        Ok(Self {
            cfg: parse_config(config)?,
        })
    }
}

#[async_trait]
impl SourcePlugin for TimerSource {
    async fn poll(&self, checkpoint: Option<&str>) -> Result<PollOutcome, PluginError> {
        let tick = checkpoint
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;

        let mut provenance = self.cfg.provenance.clone();
        provenance
            .entry("platform".to_string())
            .or_insert_with(|| json!("timer"));
        provenance.insert("kind".to_string(), json!("tick"));

        let mut payload = Map::new();
        payload.insert("tick".to_string(), json!(tick));

        // The driver overwrites source_id with the configured value.
        let event = Event::new("timer", EventType::ResourceChanged)
            .with_provenance(provenance)
            .with_payload(payload);

        Ok(PollOutcome {
            events: vec![event],
            checkpoint: Some(tick.to_string()),
        })
    }
}
