pub mod memory;
pub mod mqtt;
pub mod topic;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;

pub use memory::MemoryPubSub;
pub use mqtt::MqttPubSub;

/// Bound of every subscription queue. A slow consumer blocks the producer.
pub const BUFFER_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn create_topic(&self, topic: &str) -> Result<()>;

    /// Stream of messages published to `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<Receiver<Message>>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PubSubConfig {
    /// In-process bus, only reaches subscribers in the same process
    Memory,
    Mqtt {
        /// e.g. `mqtt://localhost:1883`
        url: String,
        #[serde(default = "default_client_id")]
        client_id: String,
        /// Prefix every topic lives under
        #[serde(default = "default_namespace")]
        namespace: String,
        /// Shared-subscription group, replicas in one group split the messages
        #[serde(default)]
        group: Option<String>,
    },
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self::Memory
    }
}

fn default_client_id() -> String {
    "clipwatch".to_string()
}

fn default_namespace() -> String {
    api::topic::PUBSUB.to_string()
}

pub async fn connect(config: &PubSubConfig) -> Result<Arc<dyn PubSub>> {
    Ok(match config {
        PubSubConfig::Memory => Arc::new(MemoryPubSub::new()),
        PubSubConfig::Mqtt {
            url,
            client_id,
            namespace,
            group,
        } => Arc::new(MqttPubSub::connect(url, client_id, namespace, group.clone()).await?),
    })
}
