//! Module instance: a named group of sources/actors/transforms/routes
//! with a single lifecycle.
//!
//! Lifecycle: `loading → active → unloading → removed`; init failures
//! land in `failed` with already-inited plugins shut down again.
//! Illegal transitions are errors. The processor only ever matches the
//! module's own routes, and ignores events for source ids it does not
//! own.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

use relay_bus::EventBus;
use relay_core::checkpoint::CheckpointStore;
use relay_core::config::{ModuleConfig, TransformKind};
use relay_core::event::Event;
use relay_core::record::{LogLevel, LogPhase, LogRecord, LogResult};
use relay_plugin::{PluginRegistry, TransformContext};

use crate::actor::ActorDriver;
use crate::error::RuntimeError;
use crate::logger::LoggerManager;
use crate::matcher::match_routes;
use crate::pipeline::{run_pipeline, LoadedTransform, PipelineOutcome};
use crate::script::ScriptTransform;
use crate::source::SourceDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Loading,
    Active,
    Unloading,
    Removed,
    Failed,
}

pub struct ModuleInstance {
    cfg: ModuleConfig,
    state: RwLock<ModuleState>,
    sources: Vec<Arc<SourceDriver>>,
    source_ids: HashSet<String>,
    actors: HashMap<String, ActorDriver>,
    transforms: HashMap<String, Arc<LoadedTransform>>,
    logger_keys: Vec<String>,
    logs: Arc<LoggerManager>,
    in_flight: AtomicU64,
    drained: Notify,
    graceful_stop: Duration,
}

impl ModuleInstance {
    /// Instantiate and init every plugin of the module. On any init
    /// failure the already-inited plugins are shut down and the module
    /// ends `failed`.
    pub async fn load(
        cfg: ModuleConfig,
        registry: &PluginRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        bus: Arc<dyn EventBus>,
        logs: Arc<LoggerManager>,
        graceful_stop: Duration,
    ) -> Result<Arc<ModuleInstance>, RuntimeError> {
        info!(module = %cfg.name, "loading module");

        let mut logger_keys = Vec::new();
        let mut sources: Vec<Arc<SourceDriver>> = Vec::new();
        let mut actors: HashMap<String, ActorDriver> = HashMap::new();
        let mut transforms: HashMap<String, Arc<LoadedTransform>> = HashMap::new();

        let result: Result<(), RuntimeError> = async {
            // Loggers first so later phases are observable.
            for logger_cfg in &cfg.loggers {
                let plugin = registry.build_logger(&logger_cfg.plugin, logger_cfg.config.clone())?;
                let key = format!("{}/{}", cfg.name, logger_cfg.name);
                logs.register(key.clone(), plugin).await?;
                logger_keys.push(key);
            }

            for transform_cfg in &cfg.transforms {
                let plugin: Box<dyn relay_plugin::TransformPlugin> = match transform_cfg.kind {
                    TransformKind::Package => {
                        let id = transform_cfg.plugin.as_deref().unwrap_or_default();
                        registry.build_transform(id, transform_cfg.config.clone())?
                    }
                    TransformKind::Script => {
                        Box::new(ScriptTransform::from_transform_config(transform_cfg)?)
                    }
                };
                plugin.init().await?;
                transforms.insert(
                    transform_cfg.name.clone(),
                    Arc::new(LoadedTransform {
                        cfg: transform_cfg.clone(),
                        plugin,
                    }),
                );
            }

            for actor_cfg in &cfg.actors {
                let plugin = registry.build_actor(&actor_cfg.plugin, actor_cfg.config.clone())?;
                plugin.init().await?;
                actors.insert(
                    actor_cfg.id.clone(),
                    ActorDriver::new(&cfg.name, actor_cfg.clone(), plugin, Arc::clone(&logs)),
                );
            }

            for source_cfg in &cfg.sources {
                let plugin =
                    registry.build_source(&source_cfg.plugin, source_plugin_config(source_cfg))?;
                let driver = Arc::new(SourceDriver::new(
                    &cfg.name,
                    source_cfg.clone(),
                    plugin,
                    Arc::clone(&checkpoints),
                    bus.clone(),
                    Arc::clone(&logs),
                ));
                driver.init_plugin().await?;
                sources.push(driver);
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(module = %cfg.name, error = %e, "module load failed, releasing resources");
            for driver in &sources {
                if let Err(e) = driver.shutdown_plugin().await {
                    warn!(module = %cfg.name, error = %e, "source shutdown during rollback failed");
                }
            }
            for (_, actor) in &actors {
                if let Err(e) = actor.shutdown_plugin().await {
                    warn!(module = %cfg.name, error = %e, "actor shutdown during rollback failed");
                }
            }
            for (_, transform) in &transforms {
                if let Err(e) = transform.plugin.shutdown().await {
                    warn!(module = %cfg.name, error = %e, "transform shutdown during rollback failed");
                }
            }
            for key in &logger_keys {
                logs.deregister(key).await;
            }
            return Err(e);
        }

        let source_ids = cfg.sources.iter().map(|s| s.id.clone()).collect();
        let module = Arc::new(ModuleInstance {
            state: RwLock::new(ModuleState::Active),
            sources,
            source_ids,
            actors,
            transforms,
            logger_keys,
            logs,
            in_flight: AtomicU64::new(0),
            drained: Notify::new(),
            graceful_stop,
            cfg,
        });
        info!(module = %module.name(), "module active");
        Ok(module)
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.cfg
    }

    pub fn state(&self) -> ModuleState {
        *self.state.read().expect("module state lock poisoned")
    }

    pub fn sources(&self) -> &[Arc<SourceDriver>] {
        &self.sources
    }

    pub fn owns_source(&self, source_id: &str) -> bool {
        self.source_ids.contains(source_id)
    }

    fn transition(&self, from: &[ModuleState], to: ModuleState) -> Result<(), RuntimeError> {
        let mut state = self.state.write().expect("module state lock poisoned");
        if !from.contains(&*state) {
            return Err(RuntimeError::IllegalTransition {
                module: self.cfg.name.clone(),
                from: *state,
                to,
            });
        }
        *state = to;
        Ok(())
    }

    // ── Processor ───────────────────────────────────────────────────

    /// Run one bus event through this module's routes.
    pub async fn process_event(&self, event: &Event) {
        if self.state() != ModuleState::Active || !self.owns_source(&event.source_id) {
            return;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(self);

        let matched = match_routes(&self.cfg.routes, event);
        if matched.is_empty() {
            self.logs.emit(
                LogRecord::new(
                    LogLevel::Debug,
                    LogPhase::Match,
                    self.cfg.name.clone(),
                    LogResult::None,
                    "match(none)",
                )
                .for_event(event),
            );
            return;
        }

        for route in matched {
            self.logs.emit(
                LogRecord::new(
                    LogLevel::Info,
                    LogPhase::Match,
                    self.cfg.name.clone(),
                    LogResult::Ok,
                    "matched",
                )
                .for_event(event)
                .route(route.name.clone()),
            );

            let chain: Vec<Arc<LoadedTransform>> = route
                .transforms
                .iter()
                .filter_map(|name| self.transforms.get(name).cloned())
                .collect();

            let ctx = TransformContext::new(
                self.cfg.name.clone(),
                route.name.clone(),
                event.trace().to_string(),
                Arc::clone(&self.logs) as Arc<dyn relay_plugin::RecordSink>,
            );

            // Each route gets an independent copy of the pre-pipeline
            // event; a drop here never suppresses other routes.
            match run_pipeline(&chain, event.clone(), &ctx).await {
                PipelineOutcome::Dropped => continue,
                PipelineOutcome::Continue(out) => {
                    if let Some(actor) = self.actors.get(&route.then.actor) {
                        actor.deliver(&out, route).await;
                    }
                }
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Drain and release the module. The caller is responsible for
    /// deregistering its sources from the scheduler and ingress first.
    pub async fn unload(&self) -> Result<(), RuntimeError> {
        self.transition(&[ModuleState::Active], ModuleState::Unloading)?;
        info!(module = %self.name(), "unloading module");

        // Wait for in-flight processing up to the graceful deadline.
        let drained = tokio::time::timeout(self.graceful_stop, async {
            loop {
                let notified = self.drained.notified();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            self.logs.emit(LogRecord::new(
                LogLevel::Warn,
                LogPhase::ActorLifecycle,
                self.cfg.name.clone(),
                LogResult::Abandoned,
                format!(
                    "{} in-flight deliveries abandoned after {}ms",
                    self.in_flight.load(Ordering::SeqCst),
                    self.graceful_stop.as_millis()
                ),
            ));
        }

        for driver in &self.sources {
            if let Err(e) = driver.shutdown_plugin().await {
                warn!(module = %self.name(), source_id = %driver.id(), error = %e, "source shutdown failed");
            }
        }
        for actor in self.actors.values() {
            if let Err(e) = actor.shutdown_plugin().await {
                warn!(module = %self.name(), actor_id = %actor.id(), error = %e, "actor shutdown failed");
            }
        }
        for transform in self.transforms.values() {
            if let Err(e) = transform.plugin.shutdown().await {
                warn!(module = %self.name(), transform = %transform.cfg.name, error = %e, "transform shutdown failed");
            }
        }
        for key in &self.logger_keys {
            self.logs.deregister(key).await;
        }

        self.transition(&[ModuleState::Unloading], ModuleState::Removed)?;
        info!(module = %self.name(), "module removed");
        Ok(())
    }
}

/// The plugin sees its own config plus the source-level bootstrap
/// hint, so a connector can honor `initial_lookback_ms` on its first
/// (checkpoint-less) poll.
fn source_plugin_config(cfg: &relay_core::config::SourceConfig) -> serde_json::Value {
    let mut value = cfg.config.clone();
    if let Some(lookback) = cfg.initial_lookback_ms {
        match &mut value {
            serde_json::Value::Object(map) => {
                map.entry("initial_lookback_ms")
                    .or_insert_with(|| serde_json::json!(lookback));
            }
            serde_json::Value::Null => {
                value = serde_json::json!({ "initial_lookback_ms": lookback });
            }
            _ => {}
        }
    }
    value
}

struct InFlightGuard<'a>(&'a ModuleInstance);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Process-wide module table. Updates are lock-guarded; reads copy out
/// snapshots so the dispatch path never holds the lock across awaits.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Arc<RwLock<HashMap<String, Arc<ModuleInstance>>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module names are unique process-wide.
    pub fn insert(&self, module: Arc<ModuleInstance>) -> Result<(), RuntimeError> {
        let mut guard = self.modules.write().expect("module registry lock poisoned");
        if guard.contains_key(module.name()) {
            return Err(RuntimeError::DuplicateModule(module.name().to_string()));
        }
        guard.insert(module.name().to_string(), module);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ModuleInstance>> {
        self.modules
            .write()
            .expect("module registry lock poisoned")
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleInstance>> {
        self.modules
            .read()
            .expect("module registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<ModuleInstance>> {
        self.modules
            .read()
            .expect("module registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Which module owns a source id, if any. Two modules cannot share
    /// a source id.
    pub fn source_owner(&self, source_id: &str) -> Option<String> {
        self.modules
            .read()
            .expect("module registry lock poisoned")
            .values()
            .find(|m| m.owns_source(source_id))
            .map(|m| m.name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_bus::MemoryBus;
    use relay_core::checkpoint::MemoryCheckpointStore;
    use relay_core::config::BusConfig;

    fn empty_module(name: &str) -> ModuleConfig {
        ModuleConfig {
            name: name.to_string(),
            sources: vec![],
            actors: vec![],
            transforms: vec![],
            routes: vec![],
            loggers: vec![],
        }
    }

    async fn load_empty(name: &str) -> Arc<ModuleInstance> {
        ModuleInstance::load(
            empty_module(name),
            &PluginRegistry::new(),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(MemoryBus::new(&BusConfig::default())),
            Arc::new(LoggerManager::new()),
            Duration::from_millis(200),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn load_reaches_active() {
        let module = load_empty("m1").await;
        assert_eq!(module.state(), ModuleState::Active);
    }

    #[tokio::test]
    async fn unload_reaches_removed() {
        let module = load_empty("m1").await;
        module.unload().await.unwrap();
        assert_eq!(module.state(), ModuleState::Removed);
    }

    #[tokio::test]
    async fn double_unload_is_illegal() {
        let module = load_empty("m1").await;
        module.unload().await.unwrap();
        let err = module.unload().await.unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_plugin_fails_the_load() {
        let mut cfg = empty_module("m1");
        cfg.sources.push(relay_core::config::SourceConfig {
            id: "s1".to_string(),
            plugin: "no-such-plugin".to_string(),
            config: serde_json::Value::Null,
            poll_interval_ms: 1_000,
            initial_lookback_ms: None,
            jitter: 0.0,
            poll_timeout_ms: 1_000,
        });
        let result = ModuleInstance::load(
            cfg,
            &PluginRegistry::new(),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(MemoryBus::new(&BusConfig::default())),
            Arc::new(LoggerManager::new()),
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_names() {
        let registry = ModuleRegistry::new();
        registry.insert(load_empty("m1").await).unwrap();
        let err = registry.insert(load_empty("m1").await).unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateModule(_)));
    }

    #[tokio::test]
    async fn registry_snapshot_and_remove() {
        let registry = ModuleRegistry::new();
        registry.insert(load_empty("m1").await).unwrap();
        registry.insert(load_empty("m2").await).unwrap();
        assert_eq!(registry.snapshot().len(), 2);
        assert!(registry.remove("m1").is_some());
        assert!(registry.get("m1").is_none());
        assert_eq!(registry.snapshot().len(), 1);
    }
}
