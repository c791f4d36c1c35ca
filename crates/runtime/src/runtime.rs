//! Runtime assembly: bus, scheduler, logger manager, webhook ingress,
//! module registry, and the control API, owned together.
//!
//! Hub-and-spoke: the runtime is the hub, modules and drivers never
//! hold a back-reference — lookups go through the registries it owns.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use relay_bus::{build_bus, EventBus};
use relay_core::checkpoint::{CheckpointStore, FsCheckpointStore};
use relay_core::config::{ModuleConfig, ProjectConfig};
use relay_plugin::PluginRegistry;

use crate::control::control_router;
use crate::error::RuntimeError;
use crate::ingress::WebhookIngress;
use crate::logger::LoggerManager;
use crate::module::{ModuleInstance, ModuleRegistry, ModuleState};
use crate::scheduler::Scheduler;
use crate::source::SourceHealth;

const PORT_FILE: &str = "runtime.port";
const PID_FILE: &str = "runtime.pid";

// ── Status types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RuntimeStatus {
    pub uptime_secs: u64,
    pub webhook_addr: Option<String>,
    pub modules: Vec<ModuleStatus>,
}

#[derive(Debug, Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub state: ModuleState,
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug, Serialize)]
pub struct SourceStatus {
    pub id: String,
    #[serde(flatten)]
    pub health: SourceHealth,
}

#[derive(Debug, Serialize)]
pub struct ModuleBrief {
    pub name: String,
    pub state: ModuleState,
}

// ── Runtime ─────────────────────────────────────────────────────────

pub struct RuntimeInner {
    config: ProjectConfig,
    registry: PluginRegistry,
    bus: Arc<dyn EventBus>,
    checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) scheduler: Scheduler,
    logs: Arc<LoggerManager>,
    modules: ModuleRegistry,
    module_configs: RwLock<HashMap<String, ModuleConfig>>,
    ingress: WebhookIngress,
    shutdown: watch::Sender<bool>,
    started_at: Instant,
    control_addr: RwLock<Option<SocketAddr>>,
    webhook_addr: RwLock<Option<SocketAddr>>,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Build every component, load modules in declaration order, bring
    /// up the control API and webhook ingress.
    ///
    /// Only unrecoverable infrastructure failures (state directory,
    /// binds, module load) abort startup; a running runtime is never
    /// killed by plugin errors.
    pub async fn start_with_config(
        config: ProjectConfig,
        registry: PluginRegistry,
    ) -> Result<Self, RuntimeError> {
        fs::create_dir_all(&config.state_dir).map_err(|e| {
            RuntimeError::Startup(format!(
                "state directory '{}' is unwritable: {e}",
                config.state_dir.display()
            ))
        })?;

        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(
            FsCheckpointStore::new(config.state_dir.join("checkpoints"))
                .map_err(|e| RuntimeError::Startup(format!("checkpoint store: {e}")))?,
        );
        let bus = build_bus(&config.bus, &config.state_dir)?;
        let graceful_stop = Duration::from_millis(config.graceful_stop_ms);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(RuntimeInner {
            registry,
            bus,
            checkpoints,
            scheduler: Scheduler::new(graceful_stop),
            logs: Arc::new(LoggerManager::new()),
            modules: ModuleRegistry::new(),
            module_configs: RwLock::new(HashMap::new()),
            ingress: WebhookIngress::new(config.webhook_api.max_body_bytes),
            shutdown,
            started_at: Instant::now(),
            control_addr: RwLock::new(None),
            webhook_addr: RwLock::new(None),
            servers: Mutex::new(Vec::new()),
            config,
        });

        // Single bus subscription; each event fans out to the modules
        // registered at dispatch time.
        let modules = inner.modules.clone();
        inner
            .bus
            .subscribe(Arc::new(move |event| {
                let modules = modules.clone();
                Box::pin(async move {
                    for module in modules.snapshot() {
                        module.process_event(&event).await;
                    }
                })
            }))
            .await?;

        for module_cfg in inner.config.modules.clone() {
            inner.load_module(module_cfg).await?;
        }

        // Start dispatch workers after modules are live, so a WAL
        // replay is observed by the routes it was meant for.
        inner.bus.start().await?;

        inner.start_control_api().await?;
        inner.start_webhook_server().await?;

        Ok(Self { inner })
    }

    pub fn handle(&self) -> Arc<RuntimeInner> {
        Arc::clone(&self.inner)
    }

    pub fn status(&self) -> RuntimeStatus {
        self.inner.status()
    }

    pub fn control_addr(&self) -> Option<SocketAddr> {
        *self.inner.control_addr.read().expect("addr lock poisoned")
    }

    pub fn webhook_addr(&self) -> Option<SocketAddr> {
        *self.inner.webhook_addr.read().expect("addr lock poisoned")
    }

    pub async fn load_module(&self, cfg: ModuleConfig) -> Result<ModuleBrief, RuntimeError> {
        self.inner.load_module(cfg).await
    }

    pub async fn unload_module(&self, name: &str) -> Result<ModuleBrief, RuntimeError> {
        self.inner.unload_module(name).await
    }

    pub async fn reload_module(&self, name: &str) -> Result<ModuleBrief, RuntimeError> {
        self.inner.reload_module(name).await
    }

    pub fn list_modules(&self) -> Vec<ModuleBrief> {
        self.inner.list_modules()
    }

    pub fn module_status(&self, name: &str) -> Option<ModuleStatus> {
        self.inner.module_status(name)
    }

    /// Coalesced immediate poll for one source (CLI test path).
    pub async fn trigger_source(&self, source_id: &str) -> Result<(), RuntimeError> {
        self.inner.scheduler.trigger_now(source_id).await
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.inner.shutdown_sequence().await
    }

    /// Block until a signal or a control-API shutdown, then run the
    /// graceful sequence. A second signal forces immediate exit.
    pub async fn run_until_shutdown(&self) -> Result<(), RuntimeError> {
        tokio::select! {
            _ = os_signal() => info!("signal received, shutting down"),
            _ = self.inner.wait_shutdown() => info!("shutdown requested via control api"),
        }

        tokio::select! {
            result = self.inner.shutdown_sequence() => result,
            _ = os_signal() => {
                warn!("second signal during graceful stop, forcing exit");
                std::process::exit(1);
            }
        }
    }
}

impl RuntimeInner {
    fn graceful_stop(&self) -> Duration {
        Duration::from_millis(self.config.graceful_stop_ms)
    }

    // ── Module lifecycle ────────────────────────────────────────────

    pub async fn load_module(&self, cfg: ModuleConfig) -> Result<ModuleBrief, RuntimeError> {
        cfg.validate()?;
        if self.modules.get(&cfg.name).is_some() {
            return Err(RuntimeError::DuplicateModule(cfg.name));
        }
        for source in &cfg.sources {
            if let Some(owner) = self.modules.source_owner(&source.id) {
                return Err(RuntimeError::DuplicateSource {
                    source_id: source.id.clone(),
                    module: owner,
                });
            }
        }

        let module = ModuleInstance::load(
            cfg.clone(),
            &self.registry,
            Arc::clone(&self.checkpoints),
            self.bus.clone(),
            Arc::clone(&self.logs),
            self.graceful_stop(),
        )
        .await?;

        self.modules.insert(Arc::clone(&module))?;
        self.module_configs
            .write()
            .expect("module configs lock poisoned")
            .insert(cfg.name.clone(), cfg);

        for driver in module.sources() {
            self.scheduler.register(Arc::clone(driver)).await;
            self.ingress.register(Arc::clone(driver));
        }

        Ok(ModuleBrief {
            name: module.name().to_string(),
            state: module.state(),
        })
    }

    pub async fn unload_module(&self, name: &str) -> Result<ModuleBrief, RuntimeError> {
        let module = self
            .modules
            .get(name)
            .ok_or_else(|| RuntimeError::ModuleNotFound(name.to_string()))?;

        for driver in module.sources() {
            self.scheduler.deregister(driver.id()).await;
            self.ingress.deregister(driver.id());
        }
        module.unload().await?;
        self.modules.remove(name);
        self.module_configs
            .write()
            .expect("module configs lock poisoned")
            .remove(name);

        Ok(ModuleBrief {
            name: name.to_string(),
            state: ModuleState::Removed,
        })
    }

    pub async fn reload_module(&self, name: &str) -> Result<ModuleBrief, RuntimeError> {
        let cfg = self
            .module_configs
            .read()
            .expect("module configs lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::ModuleNotFound(name.to_string()))?;
        self.unload_module(name).await?;
        self.load_module(cfg).await
    }

    pub fn list_modules(&self) -> Vec<ModuleBrief> {
        self.modules
            .snapshot()
            .into_iter()
            .map(|m| ModuleBrief {
                name: m.name().to_string(),
                state: m.state(),
            })
            .collect()
    }

    pub fn module_status(&self, name: &str) -> Option<ModuleStatus> {
        self.modules.get(name).map(|m| module_status(&m))
    }

    pub fn status(&self) -> RuntimeStatus {
        let mut modules: Vec<ModuleStatus> =
            self.modules.snapshot().iter().map(|m| module_status(m)).collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        RuntimeStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            webhook_addr: self
                .webhook_addr
                .read()
                .expect("addr lock poisoned")
                .map(|a| a.to_string()),
            modules,
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────

    pub fn begin_shutdown(&self) {
        // send_replace never fails, even with no subscriber yet.
        self.shutdown.send_replace(true);
    }

    pub(crate) async fn wait_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Graceful stop: scheduler, bus drain, module unloads, logger
    /// flush, servers, state files.
    pub(crate) async fn shutdown_sequence(&self) -> Result<(), RuntimeError> {
        info!("graceful shutdown started");
        self.begin_shutdown();

        self.scheduler.shutdown().await;

        if let Err(e) = self.bus.shutdown().await {
            warn!(error = %e, "bus shutdown failed");
        }

        for module in self.modules.snapshot() {
            for driver in module.sources() {
                self.ingress.deregister(driver.id());
            }
            if let Err(e) = module.unload().await {
                warn!(module = %module.name(), error = %e, "unload during shutdown failed");
            }
            self.modules.remove(module.name());
        }

        self.logs.shutdown().await;

        let servers: Vec<JoinHandle<()>> = self.servers.lock().await.drain(..).collect();
        for server in servers {
            let _ = server.await;
        }

        self.remove_runtime_files();
        info!("shutdown complete");
        Ok(())
    }

    // ── Servers ─────────────────────────────────────────────────────

    async fn start_control_api(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let bind = &self.config.control_api.bind;
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| RuntimeError::Startup(format!("control api bind '{bind}': {e}")))?;
        let addr = listener.local_addr()?;
        *self.control_addr.write().expect("addr lock poisoned") = Some(addr);

        self.write_runtime_files(addr).map_err(|e| {
            RuntimeError::Startup(format!("cannot write runtime files: {e}"))
        })?;

        let router = control_router(Arc::clone(self));
        let inner = Arc::clone(self);
        let server = tokio::spawn(async move {
            let shutdown = Arc::clone(&inner);
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.wait_shutdown().await })
                .await
            {
                warn!(error = %e, "control api server error");
            }
        });
        self.servers.lock().await.push(server);
        info!(addr = %addr, "control api listening");
        Ok(())
    }

    async fn start_webhook_server(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let bind = &self.config.webhook_api.bind;
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| RuntimeError::Startup(format!("webhook bind '{bind}': {e}")))?;
        let addr = listener.local_addr()?;
        *self.webhook_addr.write().expect("addr lock poisoned") = Some(addr);

        let router = self.ingress.router();
        let inner = Arc::clone(self);
        let server = tokio::spawn(async move {
            let shutdown = Arc::clone(&inner);
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.wait_shutdown().await })
                .await
            {
                warn!(error = %e, "webhook server error");
            }
        });
        self.servers.lock().await.push(server);
        info!(addr = %addr, "webhook ingress listening");
        Ok(())
    }

    // ── State files ─────────────────────────────────────────────────

    fn write_runtime_files(&self, addr: SocketAddr) -> std::io::Result<()> {
        fs::write(
            self.config.state_dir.join(PORT_FILE),
            addr.port().to_string(),
        )?;
        fs::write(
            self.config.state_dir.join(PID_FILE),
            std::process::id().to_string(),
        )
    }

    fn remove_runtime_files(&self) {
        for file in [PORT_FILE, PID_FILE] {
            let path = self.config.state_dir.join(file);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove state file");
                }
            }
        }
    }
}

fn module_status(module: &Arc<ModuleInstance>) -> ModuleStatus {
    ModuleStatus {
        name: module.name().to_string(),
        state: module.state(),
        sources: module
            .sources()
            .iter()
            .map(|driver| SourceStatus {
                id: driver.id().to_string(),
                health: driver.health(),
            })
            .collect(),
    }
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
