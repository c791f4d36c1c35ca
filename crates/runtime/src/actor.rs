//! Actor driver: wraps an actor plugin for one configured actor.
//!
//! Resolves delivery-time sugar (the launch-prompt file), enforces the
//! per-delivery deadline, classifies results, and retries transient
//! errors with bounded exponential backoff. Rejected deliveries are
//! terminal and never retried.

use std::time::Duration;

use relay_core::config::{ActorConfig, RouteConfig};
use relay_core::error::ErrorKind;
use relay_core::event::Event;
use relay_core::record::{LogLevel, LogPhase, LogRecord, LogResult};
use relay_plugin::{ActorPlugin, Delivery, PluginError};

use std::sync::Arc;

use crate::catch::catch_plugin_panic;
use crate::logger::LoggerManager;

const RETRY_CAP: Duration = Duration::from_secs(30);

/// Terminal result of a delivery, after any retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverOutcome {
    Delivered { attempts: u32 },
    Rejected { reason: String },
    Failed { attempts: u32, error: String },
}

pub struct ActorDriver {
    module: String,
    cfg: ActorConfig,
    plugin: Box<dyn ActorPlugin>,
    logs: Arc<LoggerManager>,
}

impl ActorDriver {
    pub fn new(
        module: impl Into<String>,
        cfg: ActorConfig,
        plugin: Box<dyn ActorPlugin>,
        logs: Arc<LoggerManager>,
    ) -> Self {
        Self {
            module: module.into(),
            cfg,
            plugin,
            logs,
        }
    }

    pub fn id(&self) -> &str {
        &self.cfg.id
    }

    pub async fn init_plugin(&self) -> Result<(), PluginError> {
        self.plugin.init().await
    }

    pub async fn shutdown_plugin(&self) -> Result<(), PluginError> {
        self.plugin.shutdown().await
    }

    /// Deliver one event for one matched route.
    pub async fn deliver(&self, event: &Event, route: &RouteConfig) -> DeliverOutcome {
        let delivery = match self.resolve_delivery(route).await {
            Ok(delivery) => delivery,
            Err(e) => {
                let reason = format!("delivery config: {e}");
                self.emit(event, route, LogLevel::Error, LogResult::Rejected, &reason, None);
                return DeliverOutcome::Rejected { reason };
            }
        };

        let deadline = Duration::from_millis(self.cfg.deliver_timeout_ms);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let attempt_call =
                catch_plugin_panic(&self.cfg.plugin, self.plugin.deliver(event, &delivery));
            let error = match tokio::time::timeout(deadline, attempt_call).await {
                Ok(Ok(())) => {
                    self.emit(
                        event,
                        route,
                        LogLevel::Info,
                        LogResult::Delivered,
                        "delivered",
                        Some(attempt),
                    );
                    return DeliverOutcome::Delivered { attempts: attempt };
                }
                Ok(Err(e)) => e,
                Err(_) => PluginError::transient(format!(
                    "delivery timed out after {}ms",
                    self.cfg.deliver_timeout_ms
                )),
            };

            match error.kind {
                ErrorKind::Rejected | ErrorKind::Validation => {
                    self.emit(
                        event,
                        route,
                        LogLevel::Warn,
                        LogResult::Rejected,
                        &error.to_string(),
                        Some(attempt),
                    );
                    return DeliverOutcome::Rejected {
                        reason: error.to_string(),
                    };
                }
                ErrorKind::Transient if attempt <= self.cfg.retry_max_attempts => {
                    self.emit(
                        event,
                        route,
                        LogLevel::Warn,
                        LogResult::Retry,
                        &error.to_string(),
                        Some(attempt),
                    );
                    tokio::time::sleep(retry_delay(self.cfg.retry_base_delay_ms, attempt)).await;
                }
                _ => {
                    self.emit(
                        event,
                        route,
                        LogLevel::Error,
                        LogResult::Error,
                        &error.to_string(),
                        Some(attempt),
                    );
                    return DeliverOutcome::Failed {
                        attempts: attempt,
                        error: error.to_string(),
                    };
                }
            }
        }
    }

    /// Resolve known delivery-time sugar: a `prompt_file` entry in the
    /// route's `with` map is loaded from disk and passed alongside.
    async fn resolve_delivery(&self, route: &RouteConfig) -> Result<Delivery, PluginError> {
        let mut prompt = None;
        if let Some(value) = route.with.get("prompt_file") {
            let path = value.as_str().ok_or_else(|| {
                PluginError::validation("prompt_file must be a string path")
            })?;
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| PluginError::validation(format!("prompt file '{path}': {e}")))?;
            prompt = Some(contents);
        }
        Ok(Delivery {
            route: route.name.clone(),
            with: route.with.clone(),
            prompt,
        })
    }

    fn emit(
        &self,
        event: &Event,
        route: &RouteConfig,
        level: LogLevel,
        result: LogResult,
        message: &str,
        attempts: Option<u32>,
    ) {
        let mut record = LogRecord::new(level, LogPhase::Deliver, self.module.clone(), result, message)
            .for_event(event)
            .route(route.name.clone())
            .actor(self.cfg.id.clone());
        if let Some(attempts) = attempts {
            record = record.field("attempts", attempts);
        }
        self.logs.emit(record);
    }
}

fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let base = Duration::from_millis(base_ms);
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(RETRY_CAP)
}
