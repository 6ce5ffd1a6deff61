use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use api::{format_time, Clip};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use storage::ClipStore;
use tracing::{debug, info, warn};

use crate::Handler;

pub const CHANNELS: &[&str] = &["ccure", "snow", "pers", "slack", "webhook"];

/// Channels whose delivery is a structured log line.
pub const LOG_CHANNELS: &[&str] = &["ccure", "snow", "pers", "slack"];

/// Alert channel without an outbound integration: fetches the clip as
/// evidence and records the alert in the log.
pub struct LogChannel {
    channel: String,
    store: Arc<dyn ClipStore>,
}

impl LogChannel {
    pub fn new(channel: &str, store: Arc<dyn ClipStore>) -> Self {
        Self {
            channel: channel.to_string(),
            store,
        }
    }
}

#[async_trait]
impl Handler for LogChannel {
    async fn handle(&self, mut clip: Clip) -> Result<()> {
        clip.alert_invocation_begin_time = format_time(Utc::now());
        let bytes = self.store.retrieve_recording_clip(&clip).await?;
        clip.alert_invocation_end_time = format_time(Utc::now());
        info!(
            channel = %self.channel,
            clip = %clip.id,
            camera = %clip.camera,
            model = %clip.model_invoker,
            tags = ?clip.tags,
            size = bytes.len(),
            begin = %clip.alert_invocation_begin_time,
            end = %clip.alert_invocation_end_time,
            "[notifier] alert raised"
        );
        Ok(())
    }
}

/// Posts the alerting clip as JSON to every configured url.
pub struct WebhookChannel {
    urls: Vec<String>,
    store: Arc<dyn ClipStore>,
    client: Client,
}

impl WebhookChannel {
    pub fn new(urls: Vec<String>, store: Arc<dyn ClipStore>) -> Result<Self> {
        Ok(Self {
            urls,
            store,
            client: Client::builder()
                .connect_timeout(Duration::from_millis(300))
                .timeout(Duration::from_millis(500))
                .build()?,
        })
    }

    async fn post(&self, url: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let status = response.status();
        let res_body = response.text().await.unwrap_or_default();
        if status.is_success() {
            debug!(url, ?status, res_body, "[notifier] webhook success");
            Ok(())
        } else {
            warn!(url, ?status, res_body, "[notifier] webhook error");
            Err(anyhow!("webhook {} returned {}", url, status))
        }
    }
}

#[async_trait]
impl Handler for WebhookChannel {
    async fn handle(&self, mut clip: Clip) -> Result<()> {
        clip.alert_invocation_begin_time = format_time(Utc::now());
        if let Err(e) = self.store.retrieve_recording_clip(&clip).await {
            warn!(clip = %clip.id, "[notifier] clip unavailable, alerting without it: {:?}", e);
        }
        clip.alert_invocation_end_time = format_time(Utc::now());

        let body = serde_json::to_string(&clip)?;
        let mut failed = 0;
        for url in &self.urls {
            if let Err(e) = self.post(url, &body).await {
                warn!(clip = %clip.id, url, "[notifier] {:?}", e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(anyhow!("{} of {} webhooks failed", failed, self.urls.len()));
        }
        info!(clip = %clip.id, hooks = self.urls.len(), "[notifier] alert delivered");
        Ok(())
    }
}
