//! In-memory bus: bounded queues, no durability.
//!
//! Everything in flight is lost on crash. Deployments that need replay
//! across restarts must configure the WAL variant; idempotency under
//! replay is then the plugin's contract.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use relay_core::config::BusConfig;
use relay_core::event::Event;

use crate::dispatch::Dispatcher;
use crate::error::BusError;
use crate::traits::{EventBus, EventHandler};

pub struct MemoryBus {
    dispatcher: Dispatcher,
    seq: AtomicU64,
}

impl MemoryBus {
    pub fn new(cfg: &BusConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(cfg),
            seq: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.enqueue(seq, event).await
    }

    async fn subscribe(&self, handler: EventHandler) -> Result<(), BusError> {
        self.dispatcher.subscribe(handler);
        Ok(())
    }

    async fn start(&self) -> Result<(), BusError> {
        self.dispatcher.start(None);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BusError> {
        self.dispatcher.shutdown().await;
        Ok(())
    }
}
