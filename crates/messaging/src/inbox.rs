//! Deduplicating inbox.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::messages::MessageId;

/// Record of inbound messages that have been processed.
///
/// A message is recorded only once its handling finished, so a redelivery
/// after a failed attempt is processed again.
#[async_trait]
pub trait Inbox: Send + Sync {
    async fn contains(&self, message_id: MessageId) -> bool;

    async fn record(&self, message_id: MessageId);
}

#[derive(Default)]
struct Processed {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
}

/// Bounded in-process inbox; the oldest ids are forgotten first.
#[derive(Clone)]
pub struct InMemoryInbox {
    processed: Arc<RwLock<Processed>>,
    capacity: usize,
}

impl Default for InMemoryInbox {
    fn default() -> Self {
        Self::with_capacity(100_000)
    }
}

impl InMemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            processed: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.processed.read().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Inbox for InMemoryInbox {
    async fn contains(&self, message_id: MessageId) -> bool {
        self.processed.read().await.ids.contains(&message_id)
    }

    async fn record(&self, message_id: MessageId) {
        let mut processed = self.processed.write().await;
        if !processed.ids.insert(message_id) {
            return;
        }
        processed.order.push_back(message_id);

        while processed.order.len() > self.capacity {
            if let Some(oldest) = processed.order.pop_front() {
                processed.ids.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remembers_recorded_ids() {
        let inbox = InMemoryInbox::new();
        let id = MessageId::new();

        assert!(!inbox.contains(id).await);
        inbox.record(id).await;
        inbox.record(id).await;

        assert!(inbox.contains(id).await);
        assert_eq!(inbox.len().await, 1);
    }

    #[tokio::test]
    async fn forgets_oldest_beyond_capacity() {
        let inbox = InMemoryInbox::with_capacity(2);
        let ids: Vec<_> = (0..3).map(|_| MessageId::new()).collect();
        for id in &ids {
            inbox.record(*id).await;
        }

        assert!(!inbox.contains(ids[0]).await);
        assert!(inbox.contains(ids[2]).await);
    }
}
