//! Fan-out publish/subscribe channel between contexts.
//!
//! The bus mirrors a browser `BroadcastChannel`:
//!
//! - every live endpoint receives every message published by *another*
//!   endpoint, never its own,
//! - a message published while an endpoint does not exist is lost for it,
//! - publishing never blocks and never waits for listeners,
//! - there is no ordering guarantee between different publishers.
//!
//! A [`Bus`] is constructed explicitly and handed to each component, which
//! opens its own [`BusEndpoint`]. Dropping the endpoint unsubscribes it.

use std::fmt;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::TransferMessage;

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    message: TransferMessage,
}

/// Handle to a broadcast bus. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("endpoints", &self.tx.receiver_count())
            .finish()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(crate::DEFAULT_BUS_CAPACITY)
    }
}

impl Bus {
    /// Create a new bus buffering up to `capacity` messages per endpoint.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Open a new endpoint on the bus.
    ///
    /// The endpoint only sees messages published after this call.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> BusEndpoint {
        let id = Uuid::new_v4();
        tracing::debug!(endpoint = name, %id, "Bus endpoint opened");
        BusEndpoint {
            publisher: BusPublisher {
                id,
                name: name.to_string(),
                tx: self.tx.clone(),
            },
            rx: self.tx.subscribe(),
        }
    }

    /// Number of endpoints currently subscribed.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Send-only side of an endpoint.
///
/// Messages published through it carry the endpoint's identity, so the
/// endpoint itself does not receive them back.
#[derive(Clone)]
pub struct BusPublisher {
    id: Uuid,
    name: String,
    tx: broadcast::Sender<Envelope>,
}

impl fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusPublisher")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl BusPublisher {
    /// Publish a message to every other live endpoint.
    ///
    /// Returns how many other endpoints were subscribed at the time. Zero is
    /// not an error: the message is simply lost.
    pub fn publish(&self, message: TransferMessage) -> usize {
        let kind = message.kind();
        let delivered = self
            .tx
            .send(Envelope {
                origin: self.id,
                message,
            })
            .map_or(0, |receivers| receivers.saturating_sub(1));

        tracing::trace!(endpoint = %self.name, %kind, delivered, "Published bus message");
        delivered
    }

    /// Endpoint identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Endpoint name, for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A component's subscription to the bus.
pub struct BusEndpoint {
    publisher: BusPublisher,
    rx: broadcast::Receiver<Envelope>,
}

impl fmt::Debug for BusEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEndpoint")
            .field("id", &self.publisher.id)
            .field("name", &self.publisher.name)
            .finish_non_exhaustive()
    }
}

impl BusEndpoint {
    /// Publish a message to every other live endpoint.
    pub fn publish(&self, message: TransferMessage) -> usize {
        self.publisher.publish(message)
    }

    /// Get a clonable publisher bound to this endpoint.
    #[must_use]
    pub fn publisher(&self) -> BusPublisher {
        self.publisher.clone()
    }

    /// Endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.publisher.name
    }

    /// Receive the next message published by another endpoint.
    ///
    /// Messages dropped because this endpoint fell behind are skipped.
    /// Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<TransferMessage> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.origin == self.publisher.id => {}
                Ok(envelope) => return Some(envelope.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        endpoint = %self.publisher.name,
                        skipped,
                        "Bus endpoint lagged, messages dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for BusEndpoint {
    fn drop(&mut self) {
        tracing::debug!(endpoint = %self.publisher.name, "Bus endpoint closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv_soon(endpoint: &mut BusEndpoint) -> Option<TransferMessage> {
        tokio::time::timeout(Duration::from_millis(100), endpoint.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_fan_out_excludes_publisher() {
        let bus = Bus::default();
        let mut a = bus.endpoint("a");
        let mut b = bus.endpoint("b");
        let mut c = bus.endpoint("c");

        let delivered = a.publish(TransferMessage::HeartbeatProbe);
        assert_eq!(delivered, 2);

        assert_eq!(recv_soon(&mut b).await, Some(TransferMessage::HeartbeatProbe));
        assert_eq!(recv_soon(&mut c).await, Some(TransferMessage::HeartbeatProbe));
        assert_eq!(recv_soon(&mut a).await, None);
    }

    #[tokio::test]
    async fn test_late_endpoint_misses_message() {
        let bus = Bus::default();
        let a = bus.endpoint("a");

        assert_eq!(a.publish(TransferMessage::ready("lost.bin")), 0);

        let mut late = bus.endpoint("late");
        assert_eq!(recv_soon(&mut late).await, None);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = Bus::default();
        let a = bus.endpoint("a");
        let b = bus.endpoint("b");
        assert_eq!(bus.endpoint_count(), 2);

        drop(b);
        assert_eq!(bus.endpoint_count(), 1);
        assert_eq!(a.publish(TransferMessage::Terminate), 0);
    }

    #[tokio::test]
    async fn test_publisher_shares_identity() {
        let bus = Bus::default();
        let mut a = bus.endpoint("a");
        let mut b = bus.endpoint("b");

        let publisher = a.publisher();
        assert_eq!(publisher.name(), "a");
        publisher.publish(TransferMessage::progress(0.5));

        assert_eq!(recv_soon(&mut b).await, Some(TransferMessage::progress(0.5)));
        assert_eq!(recv_soon(&mut a).await, None);
    }

    #[tokio::test]
    async fn test_lagged_endpoint_keeps_receiving() {
        let bus = Bus::new(2);
        let a = bus.endpoint("a");
        let mut b = bus.endpoint("b");

        for i in 0..5 {
            a.publish(TransferMessage::progress(f64::from(i) / 10.0));
        }

        // The oldest messages are gone, the newest ones still arrive.
        assert_eq!(recv_soon(&mut b).await, Some(TransferMessage::progress(0.3)));
        assert_eq!(recv_soon(&mut b).await, Some(TransferMessage::progress(0.4)));
    }
}
