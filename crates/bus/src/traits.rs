use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use relay_core::event::Event;

use crate::error::BusError;

/// Boxed future returned by an event handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A consumer invoked once per dispatched event.
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// The publish/subscribe spine.
///
/// Delivery is at-least-once. Per source id, events are observed by
/// subscribers in publish order; across sources no ordering is
/// guaranteed.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Enqueue an event and return; never waits for subscribers.
    async fn publish(&self, event: Event) -> Result<(), BusError>;

    /// Register a consumer. Handlers registered after `start` observe
    /// only events dispatched from then on.
    async fn subscribe(&self, handler: EventHandler) -> Result<(), BusError>;

    /// Start dispatch workers (and replay unacked WAL entries).
    async fn start(&self) -> Result<(), BusError>;

    /// Stop accepting publishes, drain queued events, stop workers.
    async fn shutdown(&self) -> Result<(), BusError>;
}

/// Blanket implementation so `Arc<dyn EventBus>` can be used directly.
#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        (**self).publish(event).await
    }

    async fn subscribe(&self, handler: EventHandler) -> Result<(), BusError> {
        (**self).subscribe(handler).await
    }

    async fn start(&self) -> Result<(), BusError> {
        (**self).start().await
    }

    async fn shutdown(&self) -> Result<(), BusError> {
        (**self).shutdown().await
    }
}
