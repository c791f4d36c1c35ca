//! Shared test plugins: a scriptable source, a recording actor, a
//! capturing logger, and a couple of deterministic transforms.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use relay_core::error::ErrorKind;
use relay_core::event::Event;
use relay_core::record::{LogPhase, LogRecord, LogResult};
use relay_plugin::{
    ActorPlugin, Delivery, LoggerPlugin, PluginError, PluginRegistry, PollOutcome, SourcePlugin,
    TransformContext, TransformOutcome, TransformPlugin,
};

// ── Source ──────────────────────────────────────────────────────────

/// Emits a fixed batch on the first poll, then polls empty.
pub struct OneShotSource {
    batch: Arc<Mutex<Vec<Event>>>,
    checkpoint: Option<String>,
}

#[async_trait]
impl SourcePlugin for OneShotSource {
    async fn poll(&self, _checkpoint: Option<&str>) -> Result<PollOutcome, PluginError> {
        let events: Vec<Event> = self.batch.lock().unwrap().drain(..).collect();
        if events.is_empty() {
            return Ok(PollOutcome::empty());
        }
        Ok(PollOutcome {
            events,
            checkpoint: self.checkpoint.clone(),
        })
    }
}

// ── Actor ───────────────────────────────────────────────────────────

/// Records deliveries; fails with scripted error kinds first.
pub struct RecordingActor {
    deliveries: Arc<Mutex<Vec<(Event, Delivery)>>>,
    failures: Arc<Mutex<Vec<ErrorKind>>>,
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl ActorPlugin for RecordingActor {
    async fn deliver(&self, event: &Event, delivery: &Delivery) -> Result<(), PluginError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        match scripted {
            Some(kind) => Err(PluginError::new(kind, "scripted failure")),
            None => {
                self.deliveries
                    .lock()
                    .unwrap()
                    .push((event.clone(), delivery.clone()));
                Ok(())
            }
        }
    }
}

// ── Logger ──────────────────────────────────────────────────────────

pub struct MemoryLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

#[async_trait]
impl LoggerPlugin for MemoryLogger {
    async fn log(&self, record: &LogRecord) -> Result<(), PluginError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ── Transforms ──────────────────────────────────────────────────────

pub struct DroppingTransform;

#[async_trait]
impl TransformPlugin for DroppingTransform {
    async fn execute(
        &self,
        _event: Event,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, PluginError> {
        Ok(TransformOutcome::Drop)
    }
}

pub struct FailingTransform;

#[async_trait]
impl TransformPlugin for FailingTransform {
    async fn execute(
        &self,
        _event: Event,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, PluginError> {
        Err(PluginError::transient("scripted transform failure"))
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// Shared handles into the test plugins registered by [`test_registry`].
#[derive(Clone)]
pub struct Harness {
    pub records: Arc<Mutex<Vec<LogRecord>>>,
    pub deliveries: Arc<Mutex<Vec<(Event, Delivery)>>>,
    pub attempts: Arc<AtomicU32>,
    pub batch: Arc<Mutex<Vec<Event>>>,
    pub failures: Arc<Mutex<Vec<ErrorKind>>>,
}

impl Harness {
    pub fn records_where(&self, phase: LogPhase, result: LogResult) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.phase == phase && r.result == result)
            .cloned()
            .collect()
    }
}

/// Built-in registry plus the test plugins: source `oneshot`, actor
/// `recording`, logger `memory`, transforms `dropall` and `failing`.
pub fn test_registry(events: Vec<Event>, checkpoint: Option<String>) -> (PluginRegistry, Harness) {
    let harness = Harness {
        records: Arc::new(Mutex::new(Vec::new())),
        deliveries: Arc::new(Mutex::new(Vec::new())),
        attempts: Arc::new(AtomicU32::new(0)),
        batch: Arc::new(Mutex::new(events)),
        failures: Arc::new(Mutex::new(Vec::new())),
    };

    let mut registry = relay_plugins::default_registry();

    let batch = Arc::clone(&harness.batch);
    let cp = checkpoint.clone();
    registry.register_source("oneshot", move |_cfg| {
        Ok(Box::new(OneShotSource {
            batch: Arc::clone(&batch),
            checkpoint: cp.clone(),
        }) as Box<dyn SourcePlugin>)
    });

    let deliveries = Arc::clone(&harness.deliveries);
    let failures = Arc::clone(&harness.failures);
    let attempts = Arc::clone(&harness.attempts);
    registry.register_actor("recording", move |_cfg| {
        Ok(Box::new(RecordingActor {
            deliveries: Arc::clone(&deliveries),
            failures: Arc::clone(&failures),
            attempts: Arc::clone(&attempts),
        }) as Box<dyn ActorPlugin>)
    });

    let records = Arc::clone(&harness.records);
    registry.register_logger("memory", move |_cfg| {
        Ok(Box::new(MemoryLogger {
            records: Arc::clone(&records),
        }) as Box<dyn LoggerPlugin>)
    });

    registry.register_transform("dropall", |_cfg| {
        Ok(Box::new(DroppingTransform) as Box<dyn TransformPlugin>)
    });
    registry.register_transform("failing", |_cfg| {
        Ok(Box::new(FailingTransform) as Box<dyn TransformPlugin>)
    });

    (registry, harness)
}

pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
