//! Dedup transform: drops events whose key was already seen.
//!
//! The window is a bounded LRU, so memory stays flat no matter how
//! long the runtime lives. This is the stock remedy for duplicate
//! deliveries after a WAL replay.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use serde::Deserialize;
use serde_json::Value;

use relay_core::event::Event;
use relay_core::record::LogLevel;
use relay_plugin::{PluginError, TransformContext, TransformOutcome, TransformPlugin};

use crate::parse_config;

fn default_capacity() -> usize {
    1024
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Dot-path whose value keys the window; defaults to the event id.
    pub key: Option<String>,
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            key: None,
            capacity: default_capacity(),
        }
    }
}

pub struct DedupTransform {
    key: Option<String>,
    seen: Mutex<LruCache<String, ()>>,
}

impl DedupTransform {
    pub fn from_config(config: Value) -> Result<Self, PluginError> {
        let cfg: DedupConfig = parse_config(config)?;
        let capacity = NonZeroUsize::new(cfg.capacity)
            .ok_or_else(|| PluginError::validation("dedup capacity must be > 0"))?;
        Ok(Self {
            key: cfg.key,
            seen: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn key_for(&self, event: &Event) -> String {
        match &self.key {
            Some(path) => event
                .lookup_path(path)
                .map(value_key)
                .unwrap_or_else(|| event.id.clone()),
            None => event.id.clone(),
        }
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TransformPlugin for DedupTransform {
    async fn execute(
        &self,
        event: Event,
        ctx: &TransformContext,
    ) -> Result<TransformOutcome, PluginError> {
        let key = self.key_for(&event);
        let duplicate = {
            let mut seen = self.seen.lock().expect("dedup lock poisoned");
            seen.put(key.clone(), ()).is_some()
        };
        if duplicate {
            ctx.log(LogLevel::Debug, format!("duplicate key '{key}'"));
            Ok(TransformOutcome::Drop)
        } else {
            Ok(TransformOutcome::Event(event))
        }
    }
}
