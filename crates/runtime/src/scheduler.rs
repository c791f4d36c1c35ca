//! Per-source polling scheduler.
//!
//! One cooperative task per source id runs a wait/poll loop with a
//! control mailbox for `trigger_now`/`pause`/`resume`/`stop`. Polls are
//! serialized per source, which also makes the scheduler the single
//! writer of that source's checkpoint. Consecutive failures switch the
//! wait to capped exponential backoff; the first success resets it.
//! Intervals are best-effort and drift is not compensated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::source::SourceDriver;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCommand {
    TriggerNow,
    Pause,
    Resume,
    Stop,
}

struct SourceTask {
    tx: mpsc::Sender<SourceCommand>,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    tasks: Mutex<HashMap<String, SourceTask>>,
    graceful_stop: Duration,
}

impl Scheduler {
    pub fn new(graceful_stop: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            graceful_stop,
        }
    }

    /// Spawn the polling task for a source. Replaces nothing: source
    /// ids are unique process-wide, enforced at module load.
    pub async fn register(&self, driver: Arc<SourceDriver>) {
        let (tx, rx) = mpsc::channel(8);
        let id = driver.id().to_string();
        info!(source_id = %id, interval_ms = driver.config().poll_interval_ms, "scheduling source");
        let task = tokio::spawn(run_source_loop(driver, rx));
        self.tasks
            .lock()
            .await
            .insert(id, SourceTask { tx, task });
    }

    /// Stop a source's loop, letting an in-flight poll finish up to the
    /// graceful deadline, then abandoning it.
    pub async fn deregister(&self, source_id: &str) {
        let Some(SourceTask { tx, task }) = self.tasks.lock().await.remove(source_id) else {
            return;
        };
        let _ = tx.send(SourceCommand::Stop).await;

        let mut task = task;
        tokio::select! {
            _ = &mut task => {}
            _ = tokio::time::sleep(self.graceful_stop) => {
                warn!(source_id = %source_id, "poll did not finish in time, abandoning");
                task.abort();
            }
        }
    }

    pub async fn control(&self, source_id: &str, command: SourceCommand) -> Result<(), RuntimeError> {
        let tasks = self.tasks.lock().await;
        let task = tasks
            .get(source_id)
            .ok_or_else(|| RuntimeError::UnknownSource(source_id.to_string()))?;
        task.tx
            .send(command)
            .await
            .map_err(|_| RuntimeError::UnknownSource(source_id.to_string()))
    }

    pub async fn trigger_now(&self, source_id: &str) -> Result<(), RuntimeError> {
        self.control(source_id, SourceCommand::TriggerNow).await
    }

    /// Stop every source loop (shutdown path).
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        for id in ids {
            self.deregister(&id).await;
        }
    }
}

async fn run_source_loop(driver: Arc<SourceDriver>, mut rx: mpsc::Receiver<SourceCommand>) {
    let interval = Duration::from_millis(driver.config().poll_interval_ms);
    let jitter = driver.config().jitter;
    let mut paused = false;
    let mut failures: u32 = 0;
    let mut trigger_pending = false;

    'outer: loop {
        if !trigger_pending {
            let delay = next_delay(interval, jitter, failures);
            tokio::select! {
                _ = tokio::time::sleep(delay), if !paused => {}
                command = rx.recv() => {
                    match command {
                        None | Some(SourceCommand::Stop) => break 'outer,
                        Some(SourceCommand::TriggerNow) => {}
                        Some(SourceCommand::Pause) => {
                            paused = true;
                            continue 'outer;
                        }
                        Some(SourceCommand::Resume) => {
                            paused = false;
                            continue 'outer;
                        }
                    }
                }
            }
        }
        trigger_pending = false;

        match driver.poll_cycle().await {
            Ok(_) => failures = 0,
            Err(e) => {
                failures = failures.saturating_add(1);
                debug!(source_id = %driver.id(), error = %e, failures, "poll cycle failed, backing off");
            }
        }

        // Commands that arrived while polling. At most one extra poll
        // is coalesced, no matter how many triggers queued up.
        while let Ok(command) = rx.try_recv() {
            match command {
                SourceCommand::Stop => break 'outer,
                SourceCommand::TriggerNow => trigger_pending = true,
                SourceCommand::Pause => paused = true,
                SourceCommand::Resume => paused = false,
            }
        }
        if paused {
            trigger_pending = false;
        }
    }
    debug!(source_id = %driver.id(), "source loop stopped");
}

fn next_delay(interval: Duration, jitter: f64, failures: u32) -> Duration {
    if failures > 0 {
        let backoff = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(failures.saturating_sub(1)));
        return backoff.min(BACKOFF_CAP);
    }
    if jitter <= 0.0 {
        return interval;
    }
    interval + interval.mul_f64(jitter * rand::random::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use relay_bus::{EventBus, MemoryBus};
    use relay_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
    use relay_core::config::{BusConfig, SourceConfig};
    use relay_plugin::{PluginError, PollOutcome, SourcePlugin};

    use crate::logger::LoggerManager;

    struct CountingSource {
        polls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl SourcePlugin for CountingSource {
        async fn poll(&self, _checkpoint: Option<&str>) -> Result<PollOutcome, PluginError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(PollOutcome::empty())
        }
    }

    fn driver(interval_ms: u64, polls: Arc<AtomicU32>) -> Arc<SourceDriver> {
        let cfg = SourceConfig {
            id: "s1".to_string(),
            plugin: "counting".to_string(),
            config: serde_json::Value::Null,
            poll_interval_ms: interval_ms,
            initial_lookback_ms: None,
            jitter: 0.0,
            poll_timeout_ms: 1_000,
        };
        Arc::new(SourceDriver::new(
            "m1",
            cfg,
            Box::new(CountingSource { polls }),
            Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
            Arc::new(MemoryBus::new(&BusConfig::default())) as Arc<dyn EventBus>,
            Arc::new(LoggerManager::new()),
        ))
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn periodic_polling_happens() {
        let polls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(1));
        scheduler.register(driver(20, polls.clone())).await;

        wait_for(|| polls.load(Ordering::SeqCst) >= 3).await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn trigger_now_skips_the_wait() {
        let polls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(1));
        // Interval far beyond the test horizon.
        scheduler.register(driver(600_000, polls.clone())).await;

        scheduler.trigger_now("s1").await.unwrap();
        wait_for(|| polls.load(Ordering::SeqCst) == 1).await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn pause_stops_polling_until_resume() {
        let polls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(1));
        scheduler.register(driver(10, polls.clone())).await;

        wait_for(|| polls.load(Ordering::SeqCst) >= 1).await;
        scheduler.control("s1", SourceCommand::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let frozen = polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(polls.load(Ordering::SeqCst), frozen, "paused source must not poll");

        scheduler.control("s1", SourceCommand::Resume).await.unwrap();
        wait_for(|| polls.load(Ordering::SeqCst) > frozen).await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn deregister_stops_the_loop() {
        let polls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(1));
        scheduler.register(driver(10, polls.clone())).await;
        wait_for(|| polls.load(Ordering::SeqCst) >= 1).await;

        scheduler.deregister("s1").await;
        let frozen = polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(polls.load(Ordering::SeqCst), frozen);

        // Commands to a stopped source are an error.
        assert!(scheduler.trigger_now("s1").await.is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let interval = Duration::from_secs(60);
        assert_eq!(next_delay(interval, 0.0, 1), Duration::from_secs(1));
        assert_eq!(next_delay(interval, 0.0, 3), Duration::from_secs(4));
        assert_eq!(next_delay(interval, 0.0, 30), BACKOFF_CAP);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let interval = Duration::from_secs(100);
        for _ in 0..50 {
            let d = next_delay(interval, 0.1, 0);
            assert!(d >= interval);
            assert!(d <= interval + Duration::from_secs(10));
        }
    }
}
