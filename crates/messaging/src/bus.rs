//! Message transport seam.
//!
//! Delivery is at-least-once and unordered: consumers deduplicate by
//! message id and tolerate reordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{MessagingError, Result};
use crate::messages::{Envelope, OutboundMessage};

/// Sends outbound integration messages to the transport.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, envelope: Envelope<OutboundMessage>) -> Result<()>;
}

#[async_trait]
impl<P> MessagePublisher for Arc<P>
where
    P: MessagePublisher + ?Sized,
{
    async fn publish(&self, envelope: Envelope<OutboundMessage>) -> Result<()> {
        (**self).publish(envelope).await
    }
}

/// In-process pub/sub bus for tests and single-node runs.
///
/// Every subscriber gets every message published after it subscribed. A
/// subscriber that falls more than `capacity` messages behind loses the
/// oldest ones. The bus also keeps a log of everything published.
#[derive(Clone)]
pub struct InMemoryMessageBus<M> {
    sender: broadcast::Sender<M>,
    published: Arc<Mutex<Vec<M>>>,
    fail_on_publish: Arc<AtomicBool>,
}

impl<M: Clone + Send + 'static> InMemoryMessageBus<M> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::default(),
            fail_on_publish: Arc::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Makes every publish fail until switched off again.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Sends to every current subscriber.
    pub fn send(&self, message: M) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(MessagingError::Publish("transport unavailable".to_string()));
        }

        self.published
            .lock()
            .map_err(|_| MessagingError::Publish("published log poisoned".to_string()))?
            .push(message.clone());

        if self.sender.send(message).is_err() {
            tracing::debug!("no subscribers listening");
        }
        Ok(())
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> Vec<M> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl<M: Clone + Send + 'static> Default for InMemoryMessageBus<M> {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessagePublisher for InMemoryMessageBus<Envelope<OutboundMessage>> {
    async fn publish(&self, envelope: Envelope<OutboundMessage>) -> Result<()> {
        let message_type = envelope.payload.message_type();
        self.send(envelope)?;
        metrics::counter!("messaging_messages_published_total", "type" => message_type)
            .increment(1);
        Ok(())
    }
}

impl InMemoryMessageBus<Envelope<OutboundMessage>> {
    /// Payloads published so far, oldest first.
    pub fn published_payloads(&self) -> Vec<OutboundMessage> {
        self.published().into_iter().map(|e| e.payload).collect()
    }
}
