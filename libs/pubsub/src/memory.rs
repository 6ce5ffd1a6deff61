use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::RwLock;
use tracing::trace;

use crate::{Message, PubSub, BUFFER_CAPACITY};

/// Fan-out bus living inside one process.
///
/// Every subscriber of a topic receives every message; publishing waits on
/// full subscriber queues.
#[derive(Clone, Default)]
pub struct MemoryPubSub {
    topics: Arc<RwLock<HashMap<String, Vec<Sender<Message>>>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn create_topic(&self, topic: &str) -> Result<()> {
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default();
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Receiver<Message>> {
        let (tx, rx) = channel(BUFFER_CAPACITY);
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let senders = {
            let mut topics = self.topics.write().await;
            let senders = topics.entry(topic.to_string()).or_default();
            senders.retain(|s| !s.is_closed());
            senders.clone()
        };
        trace!(topic, subscribers = senders.len(), "memory publish");
        for sender in senders {
            let _ = sender
                .send(Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                })
                .await;
        }
        Ok(())
    }
}
