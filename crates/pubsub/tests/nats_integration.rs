#![cfg(feature = "integration-tests")]

use bytes::Bytes;
use common::domain::{ApplicationPubSub, ApplicationPubSubIdentifiers, PubSubProvider};
use futures::StreamExt;
use pubsub::{NatsProvider, Provider};
use std::time::Duration;
use testcontainers::core::WaitFor;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

async fn start_nats() -> (ContainerAsync<GenericImage>, String) {
    let container = GenericImage::new("nats", "latest")
        .with_exposed_port(4222.into())
        .with_wait_for(WaitFor::message_on_stderr("Server is ready"))
        .start()
        .await
        .unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(4222).await.unwrap();
    (container, format!("nats://{}:{}", host, port))
}

fn pubsub(server_url: String) -> ApplicationPubSub {
    ApplicationPubSub {
        ids: ApplicationPubSubIdentifiers::new("foo-app", "foo-ps"),
        format: "json".to_string(),
        base_topic: "v3/foo-app".to_string(),
        provider: PubSubProvider::Nats { server_url },
        ..Default::default()
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_nats_topics_round_trip() {
    let (_container, url) = start_nats().await;
    let provider = NatsProvider::new(Duration::from_secs(5));
    let connection = provider.connect(&pubsub(url)).await.unwrap();

    let mut messages = connection
        .subscribe("v3/foo-app/down/push/+")
        .await
        .unwrap();
    // The subscription is registered asynchronously on the server.
    let mut received = None;
    for _ in 0..50 {
        connection
            .publish("v3/foo-app/down/push/foo-device", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        if let Ok(message) = tokio::time::timeout(Duration::from_millis(100), messages.next()).await
        {
            received = message;
            break;
        }
    }
    connection.close().await;

    let message = received.expect("message received");
    assert_eq!(message.topic, "v3/foo-app/down/push/foo-device");
    assert_eq!(message.payload, Bytes::from_static(b"{}"));
}
