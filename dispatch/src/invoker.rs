use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use api::clip::{CLIP_TYPE_ALERT, CLIP_TYPE_METADATA};
use api::{format_time, topic, Clip};
use async_trait::async_trait;
use chrono::Utc;
use pubsub::PubSub;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use storage::ClipStore;
use tracing::{debug, error, info};

use crate::config::Model;
use crate::Handler;

pub const MODELS: &[&str] = &["fire", "weapon"];

const MAX_RANDOM_TAGS: usize = 20;

/// Tags a model can report. The model's own name is its alert tag.
pub fn vocabulary(model: &str) -> &'static [&'static str] {
    match model {
        "fire" => &["fire", "smoke", "flame", "heat", "ember", "spark", "ash", "haze"],
        "weapon" => &["weapon", "gun", "knife", "rifle", "pistol", "blade", "bat", "holster"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub tags: Vec<String>,
    pub positive: bool,
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Whether the clip bytes are fetched before detection.
    fn needs_bytes(&self) -> bool {
        true
    }

    async fn detect(&self, model: &str, clip: &Clip, bytes: Option<&[u8]>) -> Result<Detection>;
}

fn random_tags(model: &str) -> Vec<String> {
    let mut rng = rand::rng();
    let count = rng.random_range(0..MAX_RANDOM_TAGS);
    let vocabulary = vocabulary(model);
    (0..count)
        .filter_map(|_| vocabulary.choose(&mut rng).map(|t| t.to_string()))
        .collect()
}

/// Stand-in for model inference: random tags from the model's vocabulary,
/// positive when the alert tag shows up.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDetector;

#[async_trait]
impl Detector for RandomDetector {
    async fn detect(&self, model: &str, _clip: &Clip, _bytes: Option<&[u8]>) -> Result<Detection> {
        let tags = random_tags(model);
        let positive = tags.iter().any(|t| t == model);
        Ok(Detection { tags, positive })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelRequest {
    id: String,
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: String,
}

/// Model served over HTTP. The model reads the clip from its cloud
/// reference and answers with a non-empty url when it detected something.
#[derive(Debug, Clone)]
pub struct ApiDetector {
    url: String,
    client: reqwest::Client,
}

impl ApiDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_millis(300))
                .timeout(timeout)
                .build()?,
        })
    }
}

#[async_trait]
impl Detector for ApiDetector {
    fn needs_bytes(&self) -> bool {
        false
    }

    async fn detect(&self, model: &str, clip: &Clip, _bytes: Option<&[u8]>) -> Result<Detection> {
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.url)
            .json(&ModelRequest {
                id: clip.id.clone(),
                url: clip.cloud_reference.clone(),
            })
            .send()
            .await?
            .error_for_status()?;
        let body: ModelResponse = response.json().await?;
        debug!(
            clip = %clip.id,
            model,
            url = %self.url,
            elapsed = ?start.elapsed(),
            "[invoker] model api answered"
        );
        Ok(Detection {
            tags: random_tags(model),
            positive: !body.url.is_empty(),
        })
    }
}

pub fn detector_from_config(cfg: &Model) -> Result<Arc<dyn Detector>> {
    Ok(match &cfg.api {
        Some(url) if !url.is_empty() => Arc::new(ApiDetector::new(url, cfg.timeout())?),
        _ => Arc::new(RandomDetector),
    })
}

pub struct ModelHandler {
    model: String,
    detector: Arc<dyn Detector>,
    store: Arc<dyn ClipStore>,
    pubsub: Arc<dyn PubSub>,
}

impl ModelHandler {
    pub fn new(
        model: &str,
        detector: Arc<dyn Detector>,
        store: Arc<dyn ClipStore>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            model: model.to_string(),
            detector,
            store,
            pubsub,
        }
    }

    async fn publish(&self, topic: &str, clip: &Clip) {
        let result = match clip.to_json() {
            Ok(payload) => self.pubsub.publish(topic, payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            error!(clip = %clip.id, topic, "[invoker] publish failed: {:?}", e);
        }
    }
}

#[async_trait]
impl Handler for ModelHandler {
    async fn handle(&self, mut clip: Clip) -> Result<()> {
        clip.model_invocation_begin_time = format_time(Utc::now());

        let bytes = if self.detector.needs_bytes() {
            Some(self.store.retrieve_recording_clip(&clip).await?)
        } else {
            None
        };
        let detection = self
            .detector
            .detect(&self.model, &clip, bytes.as_deref())
            .await?;

        clip.model_invoker = self.model.clone();
        clip.set_tags(detection.tags);

        if detection.positive {
            clip.alerts_count = 1;
            clip.clip_type = CLIP_TYPE_ALERT;
            clip.model_invocation_end_time = format_time(Utc::now());
            info!(clip = %clip.id, model = %self.model, tags = clip.tags_count, "[invoker] alert");
            self.publish(topic::ALERTS, &clip).await;
        }

        clip.clip_type = CLIP_TYPE_METADATA;
        clip.model_invocation_end_time = format_time(Utc::now());
        debug!(clip = %clip.id, model = %self.model, tags = clip.tags_count, "[invoker] metadata");
        self.publish(topic::METADATA, &clip).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_random_detector_stays_in_vocabulary() {
        let clip = Clip::default();
        for _ in 0..50 {
            let detection = RandomDetector.detect("fire", &clip, None).await.unwrap();
            assert!(detection.tags.len() < MAX_RANDOM_TAGS);
            assert!(detection.tags.iter().all(|t| vocabulary("fire").contains(&t.as_str())));
            assert_eq!(detection.positive, detection.tags.iter().any(|t| t == "fire"));
        }
    }

    #[test]
    fn test_every_model_has_vocabulary() {
        for model in MODELS {
            assert!(vocabulary(model).contains(model));
        }
    }

    #[test]
    fn test_detector_from_config() {
        let random = detector_from_config(&Model::default()).unwrap();
        assert!(random.needs_bytes());
        let api = detector_from_config(&Model {
            api: Some("http://localhost:8000/detect".to_string()),
            timeout: 100,
        })
        .unwrap();
        assert!(!api.needs_bytes());
    }
}
