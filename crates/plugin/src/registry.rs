//! Plugin registry: id → factory tables.
//!
//! A registration is a record holding a factory closure plus setup
//! metadata; the runtime instantiates plugins from these records. No
//! reflection, no dynamic loading — builds register their plugins at
//! startup.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PluginError;
use crate::traits::{ActorPlugin, LoggerPlugin, SourcePlugin, TransformPlugin};

pub type SourceFactory =
    Arc<dyn Fn(Value) -> Result<Box<dyn SourcePlugin>, PluginError> + Send + Sync>;
pub type ActorFactory =
    Arc<dyn Fn(Value) -> Result<Box<dyn ActorPlugin>, PluginError> + Send + Sync>;
pub type TransformFactory =
    Arc<dyn Fn(Value) -> Result<Box<dyn TransformPlugin>, PluginError> + Send + Sync>;
pub type LoggerFactory =
    Arc<dyn Fn(Value) -> Result<Box<dyn LoggerPlugin>, PluginError> + Send + Sync>;

/// Environment/infrastructure requirements, surfaced by doctor-style
/// tooling. Never consulted by the runtime itself.
#[derive(Debug, Clone, Default)]
pub struct SetupMetadata {
    pub env_vars: Vec<&'static str>,
    pub services: Vec<&'static str>,
}

#[derive(Clone)]
pub struct SourceRegistration {
    pub id: String,
    pub build: SourceFactory,
    pub setup: SetupMetadata,
}

#[derive(Clone)]
pub struct ActorRegistration {
    pub id: String,
    pub build: ActorFactory,
    pub setup: SetupMetadata,
}

#[derive(Clone)]
pub struct TransformRegistration {
    pub id: String,
    pub build: TransformFactory,
}

#[derive(Clone)]
pub struct LoggerRegistration {
    pub id: String,
    pub build: LoggerFactory,
}

/// Process-wide table of known plugins, keyed by registry id.
///
/// Re-registering an id replaces the prior entry (last one wins).
#[derive(Default, Clone)]
pub struct PluginRegistry {
    sources: HashMap<String, SourceRegistration>,
    actors: HashMap<String, ActorRegistration>,
    transforms: HashMap<String, TransformRegistration>,
    loggers: HashMap<String, LoggerRegistration>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ────────────────────────────────────────────────

    pub fn register_source<F>(&mut self, id: impl Into<String>, build: F)
    where
        F: Fn(Value) -> Result<Box<dyn SourcePlugin>, PluginError> + Send + Sync + 'static,
    {
        let id = id.into();
        self.sources.insert(
            id.clone(),
            SourceRegistration {
                id,
                build: Arc::new(build),
                setup: SetupMetadata::default(),
            },
        );
    }

    pub fn register_source_with_setup<F>(
        &mut self,
        id: impl Into<String>,
        setup: SetupMetadata,
        build: F,
    ) where
        F: Fn(Value) -> Result<Box<dyn SourcePlugin>, PluginError> + Send + Sync + 'static,
    {
        let id = id.into();
        self.sources.insert(
            id.clone(),
            SourceRegistration {
                id,
                build: Arc::new(build),
                setup,
            },
        );
    }

    pub fn register_actor<F>(&mut self, id: impl Into<String>, build: F)
    where
        F: Fn(Value) -> Result<Box<dyn ActorPlugin>, PluginError> + Send + Sync + 'static,
    {
        let id = id.into();
        self.actors.insert(
            id.clone(),
            ActorRegistration {
                id,
                build: Arc::new(build),
                setup: SetupMetadata::default(),
            },
        );
    }

    pub fn register_transform<F>(&mut self, id: impl Into<String>, build: F)
    where
        F: Fn(Value) -> Result<Box<dyn TransformPlugin>, PluginError> + Send + Sync + 'static,
    {
        let id = id.into();
        self.transforms.insert(
            id.clone(),
            TransformRegistration {
                id,
                build: Arc::new(build),
            },
        );
    }

    pub fn register_logger<F>(&mut self, id: impl Into<String>, build: F)
    where
        F: Fn(Value) -> Result<Box<dyn LoggerPlugin>, PluginError> + Send + Sync + 'static,
    {
        let id = id.into();
        self.loggers.insert(
            id.clone(),
            LoggerRegistration {
                id,
                build: Arc::new(build),
            },
        );
    }

    // ── Instantiation ───────────────────────────────────────────────

    pub fn build_source(
        &self,
        id: &str,
        config: Value,
    ) -> Result<Box<dyn SourcePlugin>, PluginError> {
        let reg = self
            .sources
            .get(id)
            .ok_or_else(|| PluginError::validation(format!("unknown source plugin '{id}'")))?;
        (reg.build)(config)
    }

    pub fn build_actor(
        &self,
        id: &str,
        config: Value,
    ) -> Result<Box<dyn ActorPlugin>, PluginError> {
        let reg = self
            .actors
            .get(id)
            .ok_or_else(|| PluginError::validation(format!("unknown actor plugin '{id}'")))?;
        (reg.build)(config)
    }

    pub fn build_transform(
        &self,
        id: &str,
        config: Value,
    ) -> Result<Box<dyn TransformPlugin>, PluginError> {
        let reg = self
            .transforms
            .get(id)
            .ok_or_else(|| PluginError::validation(format!("unknown transform plugin '{id}'")))?;
        (reg.build)(config)
    }

    pub fn build_logger(
        &self,
        id: &str,
        config: Value,
    ) -> Result<Box<dyn LoggerPlugin>, PluginError> {
        let reg = self
            .loggers
            .get(id)
            .ok_or_else(|| PluginError::validation(format!("unknown logger plugin '{id}'")))?;
        (reg.build)(config)
    }

    pub fn source_setup(&self, id: &str) -> Option<&SetupMetadata> {
        self.sources.get(id).map(|r| &r.setup)
    }
}
