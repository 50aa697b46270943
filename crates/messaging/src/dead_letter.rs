//! Dead-letter queue for messages that could not be processed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::messages::{Envelope, InboundMessage, MessageId};

/// A message parked after its last delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub envelope: Envelope<InboundMessage>,
    pub error: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(envelope: Envelope<InboundMessage>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            envelope,
            error: error.into(),
            attempts,
            dead_lettered_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn push(&self, letter: DeadLetter);

    /// Parked messages, oldest first.
    async fn list(&self) -> Vec<DeadLetter>;

    /// Removes a parked message, e.g. to redeliver it by hand.
    async fn take(&self, message_id: MessageId) -> Option<DeadLetter>;
}

#[derive(Clone, Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn push(&self, letter: DeadLetter) {
        self.letters.write().await.push(letter);
    }

    async fn list(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }

    async fn take(&self, message_id: MessageId) -> Option<DeadLetter> {
        let mut letters = self.letters.write().await;
        let index = letters
            .iter()
            .position(|l| l.envelope.message_id == message_id)?;
        Some(letters.remove(index))
    }
}
