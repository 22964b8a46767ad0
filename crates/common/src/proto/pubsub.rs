use prost_types::{FieldMask, Timestamp};
use std::collections::HashMap;

use super::convert::{datetime_to_timestamp, timestamp_to_datetime, unknown_enum};
use super::identifiers::{
    from_proto_pubsub_ids, to_proto_pubsub_ids, ApplicationIdentifiers,
    ApplicationPubSubIdentifiers,
};
use crate::domain::{self, DomainResult};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPubSubMessage {
    #[prost(string, tag = "1")]
    pub topic: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NatsProvider {
    #[prost(string, tag = "1")]
    pub server_url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MqttQos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MqttProvider {
    #[prost(string, tag = "1")]
    pub server_url: String,
    #[prost(string, tag = "2")]
    pub client_id: String,
    #[prost(string, tag = "3")]
    pub username: String,
    #[prost(string, tag = "4")]
    pub password: String,
    #[prost(enumeration = "MqttQos", tag = "5")]
    pub subscribe_qos: i32,
    #[prost(enumeration = "MqttQos", tag = "6")]
    pub publish_qos: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPubSub {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationPubSubIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub created_at: Option<Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub updated_at: Option<Timestamp>,
    #[prost(string, tag = "4")]
    pub format: String,
    #[prost(string, tag = "5")]
    pub base_topic: String,
    #[prost(oneof = "application_pub_sub::Provider", tags = "6, 7")]
    pub provider: Option<application_pub_sub::Provider>,
    #[prost(message, optional, tag = "8")]
    pub downlink_push: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "9")]
    pub downlink_replace: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "10")]
    pub uplink_message: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "11")]
    pub uplink_normalized: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "12")]
    pub join_accept: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "13")]
    pub downlink_ack: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "14")]
    pub downlink_nack: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "15")]
    pub downlink_sent: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "16")]
    pub downlink_failed: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "17")]
    pub downlink_queued: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "18")]
    pub downlink_queue_invalidated: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "19")]
    pub location_solved: Option<ApplicationPubSubMessage>,
    #[prost(message, optional, tag = "20")]
    pub service_data: Option<ApplicationPubSubMessage>,
}

pub mod application_pub_sub {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Provider {
        #[prost(message, tag = "6")]
        Nats(super::NatsProvider),
        #[prost(message, tag = "7")]
        Mqtt(super::MqttProvider),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPubSubs {
    #[prost(message, repeated, tag = "1")]
    pub pubsubs: Vec<ApplicationPubSub>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetApplicationPubSubRequest {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationPubSubIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListApplicationPubSubsRequest {
    #[prost(message, optional, tag = "1")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetApplicationPubSubRequest {
    #[prost(message, optional, tag = "1")]
    pub pubsub: Option<ApplicationPubSub>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPubSubFormats {
    #[prost(map = "string, string", tag = "1")]
    pub formats: HashMap<String, String>,
}

fn to_proto_qos(qos: domain::MqttQos) -> i32 {
    match qos {
        domain::MqttQos::AtMostOnce => MqttQos::AtMostOnce as i32,
        domain::MqttQos::AtLeastOnce => MqttQos::AtLeastOnce as i32,
        domain::MqttQos::ExactlyOnce => MqttQos::ExactlyOnce as i32,
    }
}

fn from_proto_qos(value: i32) -> DomainResult<domain::MqttQos> {
    match MqttQos::try_from(value) {
        Ok(MqttQos::AtMostOnce) => Ok(domain::MqttQos::AtMostOnce),
        Ok(MqttQos::AtLeastOnce) => Ok(domain::MqttQos::AtLeastOnce),
        Ok(MqttQos::ExactlyOnce) => Ok(domain::MqttQos::ExactlyOnce),
        Err(_) => Err(unknown_enum("mqtt qos", value)),
    }
}

fn to_proto_message(m: Option<domain::PubSubMessage>) -> Option<ApplicationPubSubMessage> {
    m.map(|m| ApplicationPubSubMessage { topic: m.topic })
}

fn from_proto_message(m: Option<ApplicationPubSubMessage>) -> Option<domain::PubSubMessage> {
    m.map(|m| domain::PubSubMessage { topic: m.topic })
}

pub fn to_proto_pubsub(ps: domain::ApplicationPubSub) -> ApplicationPubSub {
    let provider = match ps.provider {
        domain::PubSubProvider::Nats { server_url } => {
            application_pub_sub::Provider::Nats(NatsProvider { server_url })
        }
        domain::PubSubProvider::Mqtt {
            server_url,
            client_id,
            username,
            password,
            subscribe_qos,
            publish_qos,
        } => application_pub_sub::Provider::Mqtt(MqttProvider {
            server_url,
            client_id,
            username,
            password,
            subscribe_qos: to_proto_qos(subscribe_qos),
            publish_qos: to_proto_qos(publish_qos),
        }),
    };
    let mut topics = ps.up_topics;
    let mut take = |kind: &str| to_proto_message(topics.remove(kind));
    ApplicationPubSub {
        ids: Some(to_proto_pubsub_ids(ps.ids)),
        created_at: datetime_to_timestamp(ps.created_at),
        updated_at: datetime_to_timestamp(ps.updated_at),
        format: ps.format,
        base_topic: ps.base_topic,
        provider: Some(provider),
        downlink_push: to_proto_message(ps.downlink_push),
        downlink_replace: to_proto_message(ps.downlink_replace),
        uplink_message: take("uplink_message"),
        uplink_normalized: take("uplink_normalized"),
        join_accept: take("join_accept"),
        downlink_ack: take("downlink_ack"),
        downlink_nack: take("downlink_nack"),
        downlink_sent: take("downlink_sent"),
        downlink_failed: take("downlink_failed"),
        downlink_queued: take("downlink_queued"),
        downlink_queue_invalidated: take("downlink_queue_invalidated"),
        location_solved: take("location_solved"),
        service_data: take("service_data"),
    }
}

pub fn from_proto_pubsub(ps: ApplicationPubSub) -> DomainResult<domain::ApplicationPubSub> {
    let provider = match ps.provider {
        None => domain::PubSubProvider::default(),
        Some(application_pub_sub::Provider::Nats(n)) => domain::PubSubProvider::Nats {
            server_url: n.server_url,
        },
        Some(application_pub_sub::Provider::Mqtt(m)) => domain::PubSubProvider::Mqtt {
            server_url: m.server_url,
            client_id: m.client_id,
            username: m.username,
            password: m.password,
            subscribe_qos: from_proto_qos(m.subscribe_qos)?,
            publish_qos: from_proto_qos(m.publish_qos)?,
        },
    };
    let up_topics = [
        ("uplink_message", ps.uplink_message),
        ("uplink_normalized", ps.uplink_normalized),
        ("join_accept", ps.join_accept),
        ("downlink_ack", ps.downlink_ack),
        ("downlink_nack", ps.downlink_nack),
        ("downlink_sent", ps.downlink_sent),
        ("downlink_failed", ps.downlink_failed),
        ("downlink_queued", ps.downlink_queued),
        ("downlink_queue_invalidated", ps.downlink_queue_invalidated),
        ("location_solved", ps.location_solved),
        ("service_data", ps.service_data),
    ]
    .into_iter()
    .filter_map(|(kind, m)| from_proto_message(m).map(|m| (kind.to_string(), m)))
    .collect();

    Ok(domain::ApplicationPubSub {
        ids: from_proto_pubsub_ids(ps.ids)?,
        format: ps.format,
        base_topic: ps.base_topic,
        provider,
        downlink_push: from_proto_message(ps.downlink_push),
        downlink_replace: from_proto_message(ps.downlink_replace),
        up_topics,
        created_at: timestamp_to_datetime(ps.created_at),
        updated_at: timestamp_to_datetime(ps.updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubsub_conversion() {
        let mut ps = domain::ApplicationPubSub {
            ids: domain::ApplicationPubSubIdentifiers::new("foo-app", "foo-ps"),
            format: "json".to_string(),
            base_topic: "v3/foo-app".to_string(),
            provider: domain::PubSubProvider::Mqtt {
                server_url: "tcp://localhost:1883".to_string(),
                client_id: "as".to_string(),
                username: String::new(),
                password: String::new(),
                subscribe_qos: domain::MqttQos::AtLeastOnce,
                publish_qos: domain::MqttQos::ExactlyOnce,
            },
            downlink_push: Some(domain::PubSubMessage {
                topic: "down/push".to_string(),
            }),
            ..Default::default()
        };
        ps.up_topics.insert(
            "uplink_message".to_string(),
            domain::PubSubMessage {
                topic: "up".to_string(),
            },
        );

        let back = from_proto_pubsub(to_proto_pubsub(ps.clone())).unwrap();

        assert_eq!(back, ps);
    }

    #[test]
    fn test_unknown_qos_rejected() {
        let proto = ApplicationPubSub {
            ids: Some(to_proto_pubsub_ids(domain::ApplicationPubSubIdentifiers::new(
                "foo-app", "foo-ps",
            ))),
            provider: Some(application_pub_sub::Provider::Mqtt(MqttProvider {
                publish_qos: 7,
                ..Default::default()
            })),
            ..Default::default()
        };

        assert!(from_proto_pubsub(proto).is_err());
    }
}
