//! Logger manager: non-blocking fan-out of records to logger plugins.
//!
//! Every registered logger gets its own bounded queue drained by a
//! dedicated task. Recording is a try-send per queue, so publishers
//! never block on a logger; an overflowing or failing logger is
//! isolated and never affects event flow.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use relay_core::record::LogRecord;
use relay_plugin::{LoggerPlugin, PluginError, RecordSink};

const QUEUE_CAPACITY: usize = 512;

struct LoggerHandle {
    tx: mpsc::Sender<LogRecord>,
    drain: JoinHandle<()>,
}

#[derive(Default)]
pub struct LoggerManager {
    loggers: RwLock<HashMap<String, LoggerHandle>>,
}

impl LoggerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Init the plugin and spawn its drain task. `key` should be
    /// unique per module/logger pair; re-registering a key retires the
    /// prior drain after it empties its queue.
    pub async fn register(
        &self,
        key: impl Into<String>,
        plugin: Box<dyn LoggerPlugin>,
    ) -> Result<(), PluginError> {
        let key = key.into();
        plugin.init().await?;

        let (tx, mut rx) = mpsc::channel::<LogRecord>(QUEUE_CAPACITY);
        let drain_key = key.clone();
        let drain = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let call = crate::catch::catch_plugin_panic(&drain_key, plugin.log(&record));
                if let Err(e) = call.await {
                    warn!(logger = %drain_key, error = %e, "logger sink failed");
                }
            }
            if let Err(e) = plugin.shutdown().await {
                warn!(logger = %drain_key, error = %e, "logger shutdown failed");
            }
        });

        self.loggers
            .write()
            .expect("loggers lock poisoned")
            .insert(key, LoggerHandle { tx, drain });
        Ok(())
    }

    /// Drop the logger's queue and wait for its drain to flush.
    pub async fn deregister(&self, key: &str) {
        let handle = self
            .loggers
            .write()
            .expect("loggers lock poisoned")
            .remove(key);
        if let Some(LoggerHandle { tx, drain }) = handle {
            drop(tx);
            let _ = drain.await;
        }
    }

    /// Fan a record out to every logger queue without blocking.
    pub fn emit(&self, record: LogRecord) {
        let guard = self.loggers.read().expect("loggers lock poisoned");
        for (key, handle) in guard.iter() {
            match handle.tx.try_send(record.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(logger = %key, "logger queue full, dropping record");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Flush and stop every logger.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, LoggerHandle)> = {
            let mut guard = self.loggers.write().expect("loggers lock poisoned");
            guard.drain().collect()
        };
        for (_, LoggerHandle { tx, drain }) in handles {
            drop(tx);
            let _ = drain.await;
        }
    }
}

impl RecordSink for LoggerManager {
    fn record(&self, record: LogRecord) {
        self.emit(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::record::{LogLevel, LogPhase, LogResult};

    struct CaptureLogger {
        seen: Arc<Mutex<Vec<LogRecord>>>,
        fail: bool,
    }

    #[async_trait]
    impl LoggerPlugin for CaptureLogger {
        async fn log(&self, record: &LogRecord) -> Result<(), PluginError> {
            if self.fail {
                return Err(PluginError::fatal("sink down"));
            }
            self.seen.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn record(message: &str) -> LogRecord {
        LogRecord::new(LogLevel::Info, LogPhase::Bus, "m1", LogResult::Ok, message)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn fans_out_to_all_loggers() {
        let manager = LoggerManager::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        manager
            .register("m1/a", Box::new(CaptureLogger { seen: a.clone(), fail: false }))
            .await
            .unwrap();
        manager
            .register("m1/b", Box::new(CaptureLogger { seen: b.clone(), fail: false }))
            .await
            .unwrap();

        manager.emit(record("hello"));
        wait_for(|| a.lock().unwrap().len() == 1 && b.lock().unwrap().len() == 1).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn failing_logger_does_not_starve_others() {
        let manager = LoggerManager::new();
        let ok = Arc::new(Mutex::new(Vec::new()));
        manager
            .register("m1/bad", Box::new(CaptureLogger { seen: Arc::new(Mutex::new(Vec::new())), fail: true }))
            .await
            .unwrap();
        manager
            .register("m1/ok", Box::new(CaptureLogger { seen: ok.clone(), fail: false }))
            .await
            .unwrap();

        for i in 0..5 {
            manager.emit(record(&format!("r{i}")));
        }
        wait_for(|| ok.lock().unwrap().len() == 5).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_queued_records() {
        let manager = LoggerManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        manager
            .register("m1/a", Box::new(CaptureLogger { seen: seen.clone(), fail: false }))
            .await
            .unwrap();

        for i in 0..20 {
            manager.emit(record(&format!("r{i}")));
        }
        manager.shutdown().await;
        assert_eq!(seen.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn deregistered_logger_stops_receiving() {
        let manager = LoggerManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        manager
            .register("m1/a", Box::new(CaptureLogger { seen: seen.clone(), fail: false }))
            .await
            .unwrap();
        manager.emit(record("before"));
        manager.deregister("m1/a").await;
        manager.emit(record("after"));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0].message, "before");
    }
}
