//! One dispatch engine for every consumer stage.
//!
//! A stage subscribes to its topic, decodes each clip and invokes the handler
//! for its own capability only when the clip lists that capability. Many
//! differently specialised instances share a topic without a router.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use api::{topic, Clip};
use async_trait::async_trait;
use pubsub::PubSub;
use storage::ClipStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;

pub mod config;
pub mod error;
pub mod indexer;
pub mod invoker;
pub mod notifier;


pub use error::DispatchError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Runs AI models on new recordings
    Invoker,
    /// Persists clip metadata
    Indexer,
    /// Raises alerts
    Notifier,
}

impl Stage {
    /// Topic the stage consumes.
    pub fn topic(&self) -> &'static str {
        match self {
            Stage::Invoker => topic::RECORDINGS,
            Stage::Indexer => topic::METADATA,
            Stage::Notifier => topic::ALERTS,
        }
    }

    /// The clip's capability list this stage routes on.
    pub fn capabilities<'a>(&self, clip: &'a Clip) -> &'a [String] {
        match self {
            Stage::Invoker => &clip.analytics,
            Stage::Indexer => &clip.media_indexer_types,
            Stage::Notifier => &clip.alert_types,
        }
    }

    /// Capabilities with a built-in handler.
    pub fn supported(&self) -> &'static [&'static str] {
        match self {
            Stage::Invoker => invoker::MODELS,
            Stage::Indexer => indexer::INDEXERS,
            Stage::Notifier => notifier::CHANNELS,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Invoker => write!(f, "model invoker"),
            Stage::Indexer => write!(f, "media indexer"),
            Stage::Notifier => write!(f, "alert notifier"),
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, clip: Clip) -> anyhow::Result<()>;
}

/// What became of one message. Every outcome acknowledges the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Capability not listed on the clip
    Skipped,
    /// Payload is not a clip
    Dropped,
}

pub struct Engine {
    stage: Stage,
    capability: String,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Engine {
    pub fn new(stage: Stage, capability: impl Into<String>) -> Self {
        Self {
            stage,
            capability: capability.into(),
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Handle one raw message. Returns the retry flag and the outcome; retry
    /// is never requested, a failed message is not redelivered.
    pub async fn dispatch(&self, payload: &[u8]) -> (bool, Result<Outcome, DispatchError>) {
        let clip = match Clip::from_json(payload) {
            Ok(clip) => clip,
            Err(e) => {
                warn!(stage = %self.stage, "[dispatch] undecodable message dropped: {}", e);
                return (false, Ok(Outcome::Dropped));
            }
        };

        if !self
            .stage
            .capabilities(&clip)
            .iter()
            .any(|c| c == &self.capability)
        {
            debug!(
                clip = %clip.id,
                capability = %self.capability,
                "[dispatch] capability not requested"
            );
            return (false, Ok(Outcome::Skipped));
        }

        let Some(handler) = self.handlers.get(&self.capability) else {
            return (
                false,
                Err(DispatchError::UnknownCapability(self.capability.clone())),
            );
        };

        let id = clip.id.clone();
        match handler.handle(clip).await {
            Ok(()) => {
                debug!(clip = %id, capability = %self.capability, "[dispatch] handled");
                (false, Ok(Outcome::Handled))
            }
            Err(e) => (false, Err(DispatchError::Handler(e))),
        }
    }

    /// Consume the stage topic until cancelled. Only an unknown capability ends the loop early.
    pub async fn run(&self, pubsub: &dyn PubSub, cancel: CancellationToken) -> Result<(), DispatchError> {
        let mut messages = pubsub
            .subscribe(self.stage.topic())
            .await
            .map_err(DispatchError::Handler)?;
        info!(
            stage = %self.stage,
            topic = self.stage.topic(),
            capability = %self.capability,
            "[dispatch] subscribed"
        );

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = messages.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        warn!(stage = %self.stage, "[dispatch] subscription closed");
                        break;
                    }
                },
            };
            match self.dispatch(&msg.payload).await {
                (_, Ok(_)) => {}
                (_, Err(e)) if e.is_fatal() => {
                    error!(stage = %self.stage, "[dispatch] {}", e);
                    return Err(e);
                }
                (_, Err(e)) => error!(stage = %self.stage, "[dispatch] {}", e),
            }
        }
        Ok(())
    }
}

/// Engine with every built-in handler of `stage` registered.
pub fn build_engine(
    stage: Stage,
    cfg: &Config,
    store: Arc<dyn ClipStore>,
    pubsub: Arc<dyn PubSub>,
) -> anyhow::Result<Engine> {
    let mut engine = Engine::new(stage, cfg.stage.capability.trim());
    match stage {
        Stage::Invoker => {
            let detector = invoker::detector_from_config(&cfg.model)?;
            for model in invoker::MODELS {
                engine = engine.register(
                    *model,
                    Arc::new(invoker::ModelHandler::new(
                        model,
                        detector.clone(),
                        store.clone(),
                        pubsub.clone(),
                    )),
                );
            }
        }
        Stage::Indexer => {
            engine = engine
                .register(
                    "database",
                    Arc::new(indexer::DatabaseIndexer::connect_lazy(&cfg.database.url)?),
                )
                .register(
                    "elastic",
                    Arc::new(indexer::ElasticIndexer::new(
                        &cfg.elastic.url,
                        &cfg.elastic.index,
                    )?),
                );
        }
        Stage::Notifier => {
            for channel in notifier::LOG_CHANNELS {
                engine = engine.register(
                    *channel,
                    Arc::new(notifier::LogChannel::new(channel, store.clone())),
                );
            }
            engine = engine.register(
                "webhook",
                Arc::new(notifier::WebhookChannel::new(
                    cfg.webhook.urls.clone(),
                    store.clone(),
                )?),
            );
        }
    }
    Ok(engine)
}

/// Run one stage process until `cancel` fires.
pub async fn serve(
    stage: Stage,
    cfg: Config,
    store: Arc<dyn ClipStore>,
    pubsub: Arc<dyn PubSub>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    for topic in topic::ALL {
        pubsub.create_topic(topic).await?;
    }
    let engine = build_engine(stage, &cfg, store, pubsub.clone())?;
    engine.run(pubsub.as_ref(), cancel).await?;
    info!(stage = %stage, "stage stopped");
    Ok(())
}
