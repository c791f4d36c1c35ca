//! Source driver: wraps a source plugin for one configured source.
//!
//! Owns the poll cycle — checkpoint load, plugin poll with deadline,
//! trace/source stamping, bus publish, checkpoint persist — plus the
//! push path for webhook-capable plugins and a health snapshot for
//! status reporting. The checkpoint never advances unless every event
//! of the cycle was accepted by the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use relay_bus::EventBus;
use relay_core::checkpoint::CheckpointStore;
use relay_core::config::SourceConfig;
use relay_core::error::ErrorKind;
use relay_core::event::{new_trace_id, Event};
use relay_core::record::{LogLevel, LogPhase, LogRecord, LogResult};
use relay_plugin::{PluginError, PushRequest, PushResponse, SourcePlugin};

use crate::catch::catch_plugin_panic;
use crate::error::RuntimeError;
use crate::logger::LoggerManager;

/// Window over which `events_in_window` is counted.
const HEALTH_WINDOW: Duration = Duration::from_secs(60);

/// Failure count at which a degraded source becomes unhealthy.
const UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub status: HealthStatus,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub events_in_window: u64,
}

#[derive(Debug)]
struct HealthInner {
    last_poll_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: u32,
    window_started_at: DateTime<Utc>,
    events_in_window: u64,
}

pub struct SourceDriver {
    module: String,
    cfg: SourceConfig,
    plugin: Box<dyn SourcePlugin>,
    checkpoints: Arc<dyn CheckpointStore>,
    bus: Arc<dyn EventBus>,
    logs: Arc<LoggerManager>,
    health: Mutex<HealthInner>,
    /// Set on a fatal plugin error; the source stays scheduled but is
    /// reported unhealthy.
    fatal: AtomicBool,
}

impl SourceDriver {
    pub fn new(
        module: impl Into<String>,
        cfg: SourceConfig,
        plugin: Box<dyn SourcePlugin>,
        checkpoints: Arc<dyn CheckpointStore>,
        bus: Arc<dyn EventBus>,
        logs: Arc<LoggerManager>,
    ) -> Self {
        Self {
            module: module.into(),
            cfg,
            plugin,
            checkpoints,
            bus,
            logs,
            health: Mutex::new(HealthInner {
                last_poll_at: None,
                last_error: None,
                consecutive_failures: 0,
                window_started_at: Utc::now(),
                events_in_window: 0,
            }),
            fatal: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.cfg.id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn config(&self) -> &SourceConfig {
        &self.cfg
    }

    pub fn is_push(&self) -> bool {
        self.plugin.as_push().is_some()
    }

    pub fn push_accepts_method(&self, method: &str) -> bool {
        self.plugin
            .as_push()
            .map(|p| p.accepts_method(method))
            .unwrap_or(false)
    }

    // ── Poll path ───────────────────────────────────────────────────

    /// One serialized poll cycle. The scheduler guarantees at most one
    /// in flight per source.
    pub async fn poll_cycle(&self) -> Result<usize, RuntimeError> {
        let result = self.poll_inner().await;
        match &result {
            Ok(count) => self.mark_success(*count as u64),
            Err(e) => self.mark_failure(&e.to_string()),
        }
        result
    }

    async fn poll_inner(&self) -> Result<usize, RuntimeError> {
        let checkpoint = self.checkpoints.get(&self.cfg.id)?;
        let deadline = Duration::from_millis(self.cfg.poll_timeout_ms);

        let poll = catch_plugin_panic(&self.cfg.plugin, self.plugin.poll(checkpoint.as_deref()));
        let outcome = match tokio::time::timeout(deadline, poll).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                if e.kind == ErrorKind::Fatal {
                    self.fatal.store(true, Ordering::SeqCst);
                }
                self.emit_poll_error(&e);
                return Err(e.into());
            }
            Err(_) => {
                let e = PluginError::transient(format!(
                    "poll timed out after {}ms",
                    self.cfg.poll_timeout_ms
                ));
                self.emit_poll_error(&e);
                return Err(e.into());
            }
        };

        let count = outcome.events.len();
        for event in outcome.events {
            self.stamp_and_publish(event).await?;
        }

        // All events accepted by the bus; only now may the checkpoint
        // advance. An empty poll can still carry a new checkpoint.
        if let Some(cp) = &outcome.checkpoint {
            self.checkpoints.put(&self.cfg.id, cp)?;
        }
        Ok(count)
    }

    async fn stamp_and_publish(&self, mut event: Event) -> Result<(), RuntimeError> {
        // Plugins may propose a source id; the configured value wins.
        event.source_id = self.cfg.id.clone();
        if event.trace_id.is_none() {
            event.trace_id = Some(new_trace_id());
        }

        let record = LogRecord::new(
            LogLevel::Info,
            LogPhase::Source,
            self.module.clone(),
            LogResult::Ok,
            "source.emit",
        )
        .for_event(&event)
        .field("source_id", self.cfg.id.as_str());

        match self.bus.publish(event).await {
            Ok(()) => {
                self.logs.emit(record);
                Ok(())
            }
            Err(e) => {
                // Treated as transient: the checkpoint stays put and the
                // next poll replays.
                self.logs.emit(
                    LogRecord::new(
                        LogLevel::Warn,
                        LogPhase::Bus,
                        self.module.clone(),
                        LogResult::Error,
                        format!("publish failed: {e}"),
                    )
                    .field("source_id", self.cfg.id.as_str()),
                );
                Err(RuntimeError::Bus(e))
            }
        }
    }

    // ── Push path ───────────────────────────────────────────────────

    /// Wrap a push plugin call: validate capability, run the handler,
    /// stamp and publish its events. Checkpoints are never touched on
    /// this path.
    pub async fn handle_push(&self, request: PushRequest) -> Result<PushResponse, PluginError> {
        let push = self
            .plugin
            .as_push()
            .ok_or_else(|| PluginError::validation("source is not push-capable"))?;

        let mut response = catch_plugin_panic(&self.cfg.plugin, push.handle(request)).await?;
        let events = std::mem::take(&mut response.events);
        let count = events.len() as u64;
        for event in events {
            self.stamp_and_publish(event)
                .await
                .map_err(|e| PluginError::transient(e.to_string()))?;
        }
        self.bump_window(count);
        Ok(response)
    }

    pub async fn shutdown_plugin(&self) -> Result<(), PluginError> {
        self.plugin.shutdown().await
    }

    pub async fn init_plugin(&self) -> Result<(), PluginError> {
        self.plugin.init().await
    }

    // ── Health ──────────────────────────────────────────────────────

    pub fn health(&self) -> SourceHealth {
        let guard = self.health.lock().expect("health lock poisoned");
        let status = if self.fatal.load(Ordering::SeqCst)
            || guard.consecutive_failures > UNHEALTHY_AFTER
        {
            HealthStatus::Unhealthy
        } else if guard.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        SourceHealth {
            status,
            last_poll_at: guard.last_poll_at,
            last_error: guard.last_error.clone(),
            consecutive_failures: guard.consecutive_failures,
            events_in_window: guard.events_in_window,
        }
    }

    fn mark_success(&self, events: u64) {
        let mut guard = self.health.lock().expect("health lock poisoned");
        guard.last_poll_at = Some(Utc::now());
        guard.consecutive_failures = 0;
        roll_window(&mut guard);
        guard.events_in_window += events;
    }

    fn mark_failure(&self, error: &str) {
        let mut guard = self.health.lock().expect("health lock poisoned");
        guard.last_poll_at = Some(Utc::now());
        guard.last_error = Some(error.to_string());
        guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
    }

    fn bump_window(&self, events: u64) {
        let mut guard = self.health.lock().expect("health lock poisoned");
        roll_window(&mut guard);
        guard.events_in_window += events;
    }

    fn emit_poll_error(&self, error: &PluginError) {
        warn!(
            source_id = %self.cfg.id,
            plugin = %self.cfg.plugin,
            error = %error,
            "poll failed"
        );
        self.logs.emit(
            LogRecord::new(
                LogLevel::Warn,
                LogPhase::Source,
                self.module.clone(),
                LogResult::Error,
                format!("poll failed: {error}"),
            )
            .field("source_id", self.cfg.id.as_str())
            .field("plugin", self.cfg.plugin.as_str())
            .field("kind", error.kind.to_string()),
        );
    }
}

fn roll_window(health: &mut HealthInner) {
    let now = Utc::now();
    let elapsed = now.signed_duration_since(health.window_started_at);
    if elapsed.num_milliseconds() as u128 > HEALTH_WINDOW.as_millis() {
        health.window_started_at = now;
        health.events_in_window = 0;
    }
}
