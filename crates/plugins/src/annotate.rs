//! Annotate transform: merges static entries into the envelope.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use relay_core::event::Event;
use relay_plugin::{PluginError, TransformContext, TransformOutcome, TransformPlugin};

use crate::parse_config;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnnotateConfig {
    /// Entries merged into provenance (existing keys are overwritten).
    pub provenance: Map<String, Value>,
    /// Entries merged into payload (existing keys are overwritten).
    pub payload: Map<String, Value>,
}

pub struct AnnotateTransform {
    cfg: AnnotateConfig,
}

impl AnnotateTransform {
    pub fn from_config(config: Value) -> Result<Self, PluginError> {
        Ok(Self {
            cfg: parse_config(config)?,
        })
    }
}

#[async_trait]
impl TransformPlugin for AnnotateTransform {
    async fn execute(
        &self,
        mut event: Event,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, PluginError> {
        for (key, value) in &self.cfg.provenance {
            event.provenance.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.cfg.payload {
            event.payload.insert(key.clone(), value.clone());
        }
        Ok(TransformOutcome::Event(event))
    }
}
