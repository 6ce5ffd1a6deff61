use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc::{
    channel, unbounded_channel, Receiver, Sender, UnboundedReceiver, UnboundedSender,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{topic, Message, PubSub, BUFFER_CAPACITY};

type Subscribers = Arc<RwLock<HashMap<String, Vec<Sender<Message>>>>>;

pub struct MqttPubSub {
    client: AsyncClient,
    namespace: String,
    group: Option<String>,
    subscribers: Subscribers,
}

impl MqttPubSub {
    pub async fn connect(
        url: &str,
        client_id: &str,
        namespace: &str,
        group: Option<String>,
    ) -> Result<Self> {
        let options = mqtt_options(url, client_id)?;
        debug!("mqtt_options: {:?}", options);

        let (client, eventloop) = AsyncClient::new(options, BUFFER_CAPACITY);
        let subscribers: Subscribers = Default::default();
        let (inbox, routed) = unbounded_channel();

        tokio::spawn(route(routed, subscribers.clone()));
        tokio::spawn(poll(
            eventloop,
            client.clone(),
            inbox,
            subscribers.clone(),
            namespace.to_string(),
            group.clone(),
        ));

        info!("mqtt pubsub {} namespace {}", url, namespace);
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            group,
            subscribers,
        })
    }
}

fn mqtt_options(url: &str, client_id: &str) -> Result<MqttOptions> {
    let mut url = url.parse::<Url>()?;
    if !url.query_pairs().any(|(k, _)| k == "client_id") {
        url.query_pairs_mut().append_pair("client_id", client_id);
    }
    Ok(MqttOptions::parse_url(url.as_str())?)
}

#[async_trait]
impl PubSub for MqttPubSub {
    async fn create_topic(&self, topic: &str) -> Result<()> {
        // MQTT topics exist as soon as someone publishes to them
        debug!(topic, "mqtt create topic");
        Ok(())
    }

    async fn subscribe(&self, name: &str) -> Result<Receiver<Message>> {
        let (tx, rx) = channel(BUFFER_CAPACITY);
        let first = {
            let mut subs = self.subscribers.write().await;
            let entry = subs.entry(name.to_string()).or_default();
            entry.push(tx);
            entry.len() == 1
        };
        if first {
            self.client
                .subscribe(
                    topic::build_sub(&self.namespace, name, self.group.as_deref()),
                    QoS::AtLeastOnce,
                )
                .await?;
        }
        Ok(rx)
    }

    async fn publish(&self, name: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(
                topic::build(&self.namespace, name),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .await?;
        Ok(())
    }
}

/// Turns an inbound publish into a message for this namespace.
fn inbound(namespace: &str, full_topic: &str, payload: &[u8]) -> Option<Message> {
    let Some((ns, name)) = topic::parse(full_topic) else {
        warn!("mqtt message on unexpected topic {}", full_topic);
        return None;
    };
    if ns != namespace {
        return None;
    }
    Some(Message {
        topic: name.to_string(),
        payload: payload.to_vec(),
    })
}

/// Delivers inbound messages to subscriber channels. Runs apart from the
/// event loop so a full subscriber channel never stalls `poll`, which also
/// drives outgoing publishes and acks.
async fn route(mut inbox: UnboundedReceiver<Message>, subscribers: Subscribers) {
    while let Some(msg) = inbox.recv().await {
        let senders = subscribers
            .read()
            .await
            .get(&msg.topic)
            .cloned()
            .unwrap_or_default();
        for sender in senders {
            let _ = sender.send(msg.clone()).await;
        }
    }
}

async fn poll(
    mut eventloop: EventLoop,
    client: AsyncClient,
    inbox: UnboundedSender<Message>,
    subscribers: Subscribers,
    namespace: String,
    group: Option<String>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                if let Some(msg) = inbound(&namespace, &p.topic, &p.payload) {
                    if inbox.send(msg).is_err() {
                        debug!("mqtt router stopped");
                        return;
                    }
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                // clean sessions drop subscriptions on reconnect
                let names: Vec<String> = subscribers.read().await.keys().cloned().collect();
                for name in names {
                    // queued for the event loop, awaiting here would wait on ourselves
                    if let Err(e) = client.try_subscribe(
                        topic::build_sub(&namespace, &name, group.as_deref()),
                        QoS::AtLeastOnce,
                    ) {
                        error!("mqtt resubscribe {} error: {:?}", name, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt eventloop error: {:?}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
