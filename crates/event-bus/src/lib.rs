use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use webpilot_core_types::PilotError;

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), PilotError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-memory bus backed by a tokio broadcast channel.
///
/// Every subscriber sees every event published after it subscribed, in
/// publication order. Dropping the last handle closes all subscriptions.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish without awaiting; events sent while nobody listens are dropped.
    pub fn emit(&self, event: E) {
        if self.sender.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), PilotError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|err| PilotError::new(err.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Helper to materialise an mpsc receiver from the bus subscription
/// so callers can await events without handling broadcast semantics directly.
pub fn to_mpsc<E>(bus: Arc<InMemoryBus<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let mut rx = bus.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        while let Ok(ev) = rx.recv().await {
            if tx.send(ev).await.is_err() {
                break;
            }
        }
    });
    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = InMemoryBus::<u32>::new(8);
        let mut rx = bus.subscribe();
        bus.publish(1).await.unwrap();
        bus.emit(2);
        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_errors_but_emit_does_not() {
        let bus = InMemoryBus::<u32>::new(8);
        assert!(bus.publish(7).await.is_err());
        bus.emit(7);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn mpsc_bridge_forwards_events() {
        let bus = InMemoryBus::<&'static str>::new(4);
        let mut rx = to_mpsc(Arc::clone(&bus), 4);
        tokio::task::yield_now().await;
        bus.emit("tab");
        assert_eq!(rx.recv().await, Some("tab"));
    }
}
