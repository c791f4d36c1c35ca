//! Built-in plugins and the default registry.
//!
//! Connector plugins for specific external platforms live out of tree;
//! these built-ins cover the generic edges (timers, webhooks, local
//! processes) and the stock transforms/loggers.

pub mod annotate;
pub mod command_actor;
pub mod console;
pub mod dedup;
pub mod jsonl;
pub mod timer;
pub mod webhook_actor;
pub mod webhook_source;

use relay_plugin::{
    ActorPlugin, LoggerPlugin, PluginRegistry, SetupMetadata, SourcePlugin, TransformPlugin,
};

pub use annotate::AnnotateTransform;
pub use command_actor::CommandActor;
pub use console::ConsoleLogger;
pub use dedup::DedupTransform;
pub use jsonl::JsonlLogger;
pub use timer::TimerSource;
pub use webhook_actor::WebhookActor;
pub use webhook_source::WebhookSource;

/// Registry with every built-in plugin registered under its stock id.
pub fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();

    registry.register_source("timer", |cfg| {
        Ok(Box::new(TimerSource::from_config(cfg)?) as Box<dyn SourcePlugin>)
    });
    registry.register_source_with_setup(
        "webhook",
        SetupMetadata {
            env_vars: vec![],
            services: vec!["inbound HTTP reachability"],
        },
        |cfg| Ok(Box::new(WebhookSource::from_config(cfg)?) as Box<dyn SourcePlugin>),
    );

    registry.register_actor("webhook", |cfg| {
        Ok(Box::new(WebhookActor::from_config(cfg)?) as Box<dyn ActorPlugin>)
    });
    registry.register_actor("command", |cfg| {
        Ok(Box::new(CommandActor::from_config(cfg)?) as Box<dyn ActorPlugin>)
    });

    registry.register_transform("dedup", |cfg| {
        Ok(Box::new(DedupTransform::from_config(cfg)?) as Box<dyn TransformPlugin>)
    });
    registry.register_transform("annotate", |cfg| {
        Ok(Box::new(AnnotateTransform::from_config(cfg)?) as Box<dyn TransformPlugin>)
    });

    registry.register_logger("console", |cfg| {
        Ok(Box::new(ConsoleLogger::from_config(cfg)?) as Box<dyn LoggerPlugin>)
    });
    registry.register_logger("jsonl", |cfg| {
        Ok(Box::new(JsonlLogger::from_config(cfg)?) as Box<dyn LoggerPlugin>)
    });

    registry
}

/// Deserialize a plugin config object, treating `null` as all-defaults.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned + Default>(
    config: serde_json::Value,
) -> Result<T, relay_plugin::PluginError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config).map_err(Into::into)
}
