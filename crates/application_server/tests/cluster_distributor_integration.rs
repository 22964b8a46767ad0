#![cfg(feature = "integration-tests")]

use application_server::domain::{ClusterDistributor, ClusterDistributorConfig, Distributor};
use common::domain::{
    ApplicationIdentifiers, ApplicationUp, ApplicationUplink, EndDeviceIdentifiers, Up,
};
use common::metrics::AsMetrics;
use common::nats::NatsClient;
use std::time::Duration;
use testcontainers::core::WaitFor;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use tokio_util::sync::CancellationToken;

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

fn distributor(client: &NatsClient, token: CancellationToken) -> ClusterDistributor {
    ClusterDistributor::new(
        client.message_bus(),
        ClusterDistributorConfig {
            subject_prefix: "test.as.up".to_string(),
            ..Default::default()
        },
        AsMetrics::shared(),
        token,
    )
}

fn uplink(application_id: &str) -> ApplicationUp {
    ApplicationUp::new(
        EndDeviceIdentifiers::new(application_id, "foo-device"),
        Up::UplinkMessage(ApplicationUplink {
            f_port: 1,
            frm_payload: vec![0x01, 0x02],
            ..Default::default()
        }),
    )
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_upstream_reaches_other_instance() {
    let (_container, url) = start_nats().await;
    let token = CancellationToken::new();
    let publisher_client = NatsClient::connect(&url, Duration::from_secs(5)).await.unwrap();
    let subscriber_client = NatsClient::connect(&url, Duration::from_secs(5)).await.unwrap();
    let publisher = distributor(&publisher_client, token.clone());
    let subscriber = distributor(&subscriber_client, token.clone());

    let mut subscription = subscriber
        .subscribe("test", Some(ApplicationIdentifiers::new("foo-app")))
        .await
        .unwrap();

    // The bus subscription is registered asynchronously on the server.
    let mut received = None;
    for _ in 0..50 {
        publisher.publish(&uplink("bar-app")).await.unwrap();
        publisher.publish(&uplink("foo-app")).await.unwrap();
        if let Ok(up) = tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await
        {
            received = up;
            break;
        }
    }

    let up = received.expect("uplink received from the other instance");
    assert_eq!(up.end_device_ids.application_ids.application_id, "foo-app");
    assert!(matches!(up.up, Up::UplinkMessage(ref m) if m.frm_payload == vec![0x01, 0x02]));
    token.cancel();
}
