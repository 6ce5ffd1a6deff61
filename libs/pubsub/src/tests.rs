use std::time::Duration;

use tokio::time::timeout;

use crate::{MemoryPubSub, PubSub, PubSubConfig};

#[tokio::test]
async fn test_memory_fan_out() {
    let bus = MemoryPubSub::new();
    bus.create_topic("recordings").await.unwrap();
    let mut a = bus.subscribe("recordings").await.unwrap();
    let mut b = bus.subscribe("recordings").await.unwrap();
    let mut other = bus.subscribe("alerts").await.unwrap();

    bus.publish("recordings", b"clip".to_vec()).await.unwrap();

    for rx in [&mut a, &mut b] {
        let msg = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, "recordings");
        assert_eq!(msg.payload, b"clip");
    }
    assert!(other.try_recv().is_err());
}

#[tokio::test]
async fn test_memory_publish_without_subscribers() {
    let bus = MemoryPubSub::new();
    bus.publish("metadata", b"dropped".to_vec()).await.unwrap();
}

#[tokio::test]
async fn test_memory_skips_closed_subscribers() {
    let bus = MemoryPubSub::new();
    let closed = bus.subscribe("alerts").await.unwrap();
    drop(closed);
    let mut open = bus.subscribe("alerts").await.unwrap();
    bus.publish("alerts", b"x".to_vec()).await.unwrap();
    assert_eq!(open.recv().await.unwrap().payload, b"x");
}

#[test]
fn test_pubsub_config_parsing() {
    let config: PubSubConfig = toml::from_str(
        r#"
type = "mqtt"
url = "mqtt://localhost:1883"
group = "database"
"#,
    )
    .unwrap();
    match config {
        PubSubConfig::Mqtt {
            url,
            client_id,
            namespace,
            group,
        } => {
            assert_eq!(url, "mqtt://localhost:1883");
            assert_eq!(client_id, "clipwatch");
            assert_eq!(namespace, "clipwatch");
            assert_eq!(group.as_deref(), Some("database"));
        }
        _ => panic!("expected mqtt config"),
    }
    assert!(matches!(PubSubConfig::default(), PubSubConfig::Memory));
}
