use std::env;
use std::time::Duration;

use pubsub::PubSubConfig;
use serde::{Deserialize, Serialize};
use storage::StorageConfig;

use crate::Stage;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub elastic: Elastic,
    #[serde(default)]
    pub webhook: Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageConfig {
    /// Model name, indexer type or alert channel this instance serves
    #[serde(default)]
    pub capability: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model HTTP API, the built-in random detector is used when unset
    #[serde(default)]
    pub api: Option<String>,
    /// Request timeout in milliseconds
    #[serde(default = "default_model_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Elastic {
    #[serde(default = "default_elastic_url")]
    pub url: String,
    #[serde(default = "default_elastic_index")]
    pub index: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default)]
    pub urls: Vec<String>,
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_model_timeout() -> u64 {
    5000
}

fn default_database_url() -> String {
    "sqlite://clips.db?mode=rwc".to_string()
}

fn default_elastic_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_elastic_index() -> String {
    "clips".to_string()
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self {
            api: None,
            timeout: default_model_timeout(),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for Elastic {
    fn default() -> Self {
        Self {
            url: default_elastic_url(),
            index: default_elastic_index(),
        }
    }
}

impl Model {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

impl Config {
    pub fn validate(&self, stage: Stage) -> anyhow::Result<()> {
        let capability = self.stage.capability.trim();
        if capability.is_empty() {
            anyhow::bail!("{} capability cannot be empty", stage);
        }
        if !stage.supported().contains(&capability) {
            anyhow::bail!(
                "{} does not support capability {}, expected one of {:?}",
                stage,
                capability,
                stage.supported()
            );
        }
        if stage == Stage::Notifier && capability == "webhook" && self.webhook.urls.is_empty() {
            anyhow::bail!("webhook alert channel needs at least one url");
        }
        Ok(())
    }
}
