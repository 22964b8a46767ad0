use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{ApplicationPubSub, DomainError, DomainResult, MqttQos, PubSubProvider};
use futures::stream::BoxStream;
use futures::StreamExt;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{topic_matches, Connection, Provider, ProviderMessage};

const REQUEST_CAPACITY: usize = 100;
const SUBSCRIPTION_BUFFER: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connects pub/subs to MQTT brokers.
pub struct MqttProvider {
    connect_timeout: Duration,
}

impl MqttProvider {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BrokerEndpoint {
    host: String,
    port: u16,
    tls: bool,
}

fn parse_server_url(url: &str) -> DomainResult<BrokerEndpoint> {
    let (rest, tls) = ["mqtts://", "ssl://", "tls://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme).map(|rest| (rest, true)))
        .or_else(|| {
            ["mqtt://", "tcp://"]
                .iter()
                .find_map(|scheme| url.strip_prefix(scheme).map(|rest| (rest, false)))
        })
        .unwrap_or((url, false));
    let rest = rest.trim_end_matches('/');
    let default_port = if tls { 8883 } else { 1883 };

    let invalid = || DomainError::InvalidArgument(format!("invalid MQTT server URL `{}`", url));
    let parts: Vec<&str> = rest.split(':').collect();
    let (host, port) = match parts.as_slice() {
        [host] => (*host, default_port),
        [host, port] => (*host, port.parse::<u16>().map_err(|_| invalid())?),
        _ => return Err(invalid()),
    };
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

fn qos(qos: MqttQos) -> QoS {
    match qos {
        MqttQos::AtMostOnce => QoS::AtMostOnce,
        MqttQos::AtLeastOnce => QoS::AtLeastOnce,
        MqttQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> DomainResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(DomainError::Unavailable(format!(
                        "MQTT broker refused connection: {:?}",
                        code
                    ))),
                };
            }
            Ok(_) => {}
            Err(e) => {
                return Err(DomainError::Unavailable(format!(
                    "MQTT connection failed: {}",
                    e
                )))
            }
        }
    }
}

#[async_trait]
impl Provider for MqttProvider {
    async fn connect(&self, pubsub: &ApplicationPubSub) -> DomainResult<Arc<dyn Connection>> {
        let PubSubProvider::Mqtt {
            server_url,
            client_id,
            username,
            password,
            subscribe_qos,
            publish_qos,
        } = &pubsub.provider
        else {
            return Err(DomainError::InvalidArgument(
                "pub/sub is not an MQTT pub/sub".to_string(),
            ));
        };

        let endpoint = parse_server_url(server_url)?;
        let client_id = if client_id.is_empty() {
            format!("as-{}", pubsub.ids.unique_id())
        } else {
            client_id.clone()
        };
        let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if !username.is_empty() {
            options.set_credentials(username.clone(), password.clone());
        }
        if endpoint.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        tokio::time::timeout(self.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                DomainError::Unavailable(format!(
                    "timed out connecting to MQTT broker {}:{}",
                    endpoint.host, endpoint.port
                ))
            })??;
        info!(host = %endpoint.host, port = endpoint.port, "connected to MQTT broker");

        let subscribers = Arc::new(Subscribers::default());
        let token = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(
            client.clone(),
            eventloop,
            subscribers.clone(),
            qos(*subscribe_qos),
            token.clone(),
        ));
        Ok(Arc::new(MqttConnection {
            client,
            subscribers,
            subscribe_qos: qos(*subscribe_qos),
            publish_qos: qos(*publish_qos),
            token,
            task: tokio::sync::Mutex::new(Some(task)),
        }))
    }
}

/// Subscription filters and the channels their messages are routed to.
#[derive(Default)]
struct Subscribers {
    routes: Mutex<Vec<(String, mpsc::Sender<ProviderMessage>)>>,
}

impl Subscribers {
    fn add(&self, filter: String, tx: mpsc::Sender<ProviderMessage>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push((filter, tx));
        }
    }

    fn filters(&self) -> Vec<String> {
        self.routes
            .lock()
            .map(|routes| routes.iter().map(|(filter, _)| filter.clone()).collect())
            .unwrap_or_default()
    }

    fn dispatch(&self, message: ProviderMessage) {
        let Ok(mut routes) = self.routes.lock() else {
            return;
        };
        routes.retain(|(_, tx)| !tx.is_closed());
        for (filter, tx) in routes.iter() {
            if topic_matches(filter, &message.topic) && tx.try_send(message.clone()).is_err() {
                warn!(topic = %message.topic, "subscriber lagging, MQTT message dropped");
            }
        }
    }
}

async fn run_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    subscribers: Arc<Subscribers>,
    subscribe_qos: QoS,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = client.disconnect().await;
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    subscribers.dispatch(ProviderMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    });
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // Clean sessions lose their subscriptions on reconnect.
                    for filter in subscribers.filters() {
                        if let Err(e) = client.try_subscribe(filter.clone(), subscribe_qos) {
                            warn!(filter = %filter, error = %e, "failed to resubscribe");
                        }
                    }
                    info!("reconnected to MQTT broker");
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => debug!("subscription acknowledged"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT event loop error, reconnecting");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
    debug!("MQTT event loop stopped");
}

pub struct MqttConnection {
    client: AsyncClient,
    subscribers: Arc<Subscribers>,
    subscribe_qos: QoS,
    publish_qos: QoS,
    token: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connection for MqttConnection {
    async fn publish(&self, topic: &str, payload: Bytes) -> DomainResult<()> {
        self.client
            .publish_bytes(topic, self.publish_qos, false, payload)
            .await
            .map_err(|e| DomainError::Unavailable(format!("MQTT publish failed: {}", e)))
    }

    async fn subscribe(&self, filter: &str) -> DomainResult<BoxStream<'static, ProviderMessage>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers.add(filter.to_string(), tx);
        self.client
            .subscribe(filter, self.subscribe_qos)
            .await
            .map_err(|e| DomainError::Unavailable(format!("MQTT subscribe failed: {}", e)))?;
        debug!(filter = %filter, "subscribed to MQTT topic");
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn close(&self) {
        self.token.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_url() {
        assert_eq!(
            parse_server_url("mqtt://broker.example:1884").unwrap(),
            BrokerEndpoint {
                host: "broker.example".to_string(),
                port: 1884,
                tls: false,
            }
        );
        assert_eq!(parse_server_url("broker.example").unwrap().port, 1883);
        let tls = parse_server_url("mqtts://broker.example").unwrap();
        assert!(tls.tls);
        assert_eq!(tls.port, 8883);
    }

    #[test]
    fn test_parse_server_url_invalid() {
        assert!(parse_server_url("mqtt://broker:port").is_err());
        assert!(parse_server_url("mqtt://a:1:2").is_err());
        assert!(parse_server_url("mqtt://").is_err());
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_filter() {
        let subscribers = Subscribers::default();
        let (push_tx, mut push_rx) = mpsc::channel(4);
        let (replace_tx, mut replace_rx) = mpsc::channel(4);
        subscribers.add("app/down/push/+".to_string(), push_tx);
        subscribers.add("app/down/replace/+".to_string(), replace_tx);

        subscribers.dispatch(ProviderMessage {
            topic: "app/down/push/dev-1".to_string(),
            payload: Bytes::from_static(b"{}"),
        });

        assert_eq!(push_rx.recv().await.unwrap().topic, "app/down/push/dev-1");
        assert!(replace_rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_drops_closed_subscribers() {
        let subscribers = Subscribers::default();
        let (tx, rx) = mpsc::channel(1);
        subscribers.add("app/#".to_string(), tx);
        drop(rx);

        subscribers.dispatch(ProviderMessage {
            topic: "app/up".to_string(),
            payload: Bytes::new(),
        });

        assert!(subscribers.filters().is_empty());
    }
}
