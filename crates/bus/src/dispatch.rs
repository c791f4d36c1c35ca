//! Shared dispatch machinery for both bus variants.
//!
//! Events are sharded onto worker queues by source id hash, so a single
//! worker observes all events of one source in enqueue order. Handlers
//! run sequentially on the dispatching worker; deliveries execute on
//! that worker.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relay_core::config::{BusConfig, OnFull};
use relay_core::event::Event;

use crate::error::BusError;
use crate::traits::EventHandler;

/// Called with the bus sequence number once every handler has seen the
/// event. The WAL variant advances its cursor here.
pub(crate) type Acker = Arc<dyn Fn(u64) + Send + Sync>;

pub(crate) struct DispatchItem {
    pub seq: u64,
    pub event: Event,
}

pub(crate) struct Dispatcher {
    on_full: OnFull,
    publish_timeout: Duration,
    senders: RwLock<Option<Vec<mpsc::Sender<DispatchItem>>>>,
    receivers: Mutex<Option<Vec<mpsc::Receiver<DispatchItem>>>>,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(cfg: &BusConfig) -> Self {
        let shard_capacity = (cfg.capacity / cfg.dispatch_workers).max(1);
        let mut senders = Vec::with_capacity(cfg.dispatch_workers);
        let mut receivers = Vec::with_capacity(cfg.dispatch_workers);
        for _ in 0..cfg.dispatch_workers {
            let (tx, rx) = mpsc::channel(shard_capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        Self {
            on_full: cfg.on_full,
            publish_timeout: Duration::from_millis(cfg.publish_timeout_ms),
            senders: RwLock::new(Some(senders)),
            receivers: Mutex::new(Some(receivers)),
            handlers: Arc::new(RwLock::new(Vec::new())),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, handler: EventHandler) {
        self.handlers
            .write()
            .expect("handlers lock poisoned")
            .push(handler);
    }

    /// Spawn one drain worker per shard. Idempotent per bus lifetime:
    /// the receivers are consumed on the first call.
    pub fn start(&self, acker: Option<Acker>) {
        let receivers = match self
            .receivers
            .lock()
            .expect("receivers lock poisoned")
            .take()
        {
            Some(r) => r,
            None => return,
        };

        let mut workers = self.workers.lock().expect("workers lock poisoned");
        for mut rx in receivers {
            let handlers = Arc::clone(&self.handlers);
            let acker = acker.clone();
            workers.push(tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    let snapshot: Vec<EventHandler> = handlers
                        .read()
                        .expect("handlers lock poisoned")
                        .clone();
                    for handler in &snapshot {
                        handler(item.event.clone()).await;
                    }
                    if let Some(ack) = &acker {
                        ack(item.seq);
                    }
                }
            }));
        }
    }

    /// Route an event onto its source's shard, applying the configured
    /// backpressure policy.
    pub async fn enqueue(&self, seq: u64, event: Event) -> Result<(), BusError> {
        let sender = {
            let guard = self.senders.read().expect("senders lock poisoned");
            let senders = guard.as_ref().ok_or(BusError::Closed)?;
            senders[shard_for(&event.source_id, senders.len())].clone()
        };

        let item = DispatchItem { seq, event };
        match self.on_full {
            OnFull::Block => sender.send(item).await.map_err(|_| BusError::Closed),
            OnFull::Drop => match sender.send_timeout(item, self.publish_timeout).await {
                Ok(()) => Ok(()),
                Err(mpsc::error::SendTimeoutError::Timeout(item)) => {
                    warn!(
                        event_id = %item.event.id,
                        source_id = %item.event.source_id,
                        "bus queue full, dropping event"
                    );
                    Ok(())
                }
                Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(BusError::Closed),
            },
        }
    }

    /// Close the publish side, drain all shards, join workers.
    pub async fn shutdown(&self) {
        // Dropping the senders lets each worker drain its queue and exit.
        self.senders.write().expect("senders lock poisoned").take();
        let workers: Vec<_> = {
            let mut guard = self.workers.lock().expect("workers lock poisoned");
            guard.drain(..).collect()
        };
        for worker in workers {
            if let Err(e) = worker.await {
                debug!(error = %e, "bus worker join failed");
            }
        }
    }
}

fn shard_for(source_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    source_id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}
