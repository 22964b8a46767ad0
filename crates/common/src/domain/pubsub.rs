use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{field_mask, ApplicationPubSubIdentifiers, MESSAGE_KINDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MqttQos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PubSubProvider {
    Nats {
        server_url: String,
    },
    Mqtt {
        server_url: String,
        #[serde(default)]
        client_id: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        subscribe_qos: MqttQos,
        #[serde(default)]
        publish_qos: MqttQos,
    },
}

impl Default for PubSubProvider {
    fn default() -> Self {
        PubSubProvider::Nats {
            server_url: "nats://localhost:4222".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PubSubMessage {
    #[serde(default)]
    pub topic: String,
}

/// Application pub/sub integration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationPubSub {
    pub ids: ApplicationPubSubIdentifiers,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub base_topic: String,
    #[serde(default)]
    pub provider: PubSubProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_push: Option<PubSubMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_replace: Option<PubSubMessage>,
    /// Upstream topics keyed by message kind (see `Up::name`).
    #[serde(default)]
    pub up_topics: std::collections::HashMap<String, PubSubMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Selectable paths. Message kinds (see [`MESSAGE_KINDS`]) select one
/// entry of `up_topics`.
pub const PUBSUB_FIELD_PATHS: &[&str] = &[
    "ids",
    "format",
    "base_topic",
    "provider",
    "downlink_push",
    "downlink_replace",
    "up_topics",
    "uplink_message",
    "uplink_normalized",
    "join_accept",
    "downlink_ack",
    "downlink_nack",
    "downlink_sent",
    "downlink_failed",
    "downlink_queued",
    "downlink_queue_invalidated",
    "location_solved",
    "service_data",
];

impl ApplicationPubSub {
    pub fn masked(&self, paths: &[String]) -> ApplicationPubSub {
        if paths.is_empty() {
            return self.clone();
        }
        let mut out = ApplicationPubSub {
            ids: self.ids.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            ..Default::default()
        };
        out.set_fields(self, paths);
        out
    }

    pub fn set_fields(&mut self, src: &ApplicationPubSub, paths: &[String]) {
        let has = |p: &str| field_mask::has_path(paths, p);
        if has("format") {
            self.format = src.format.clone();
        }
        if has("base_topic") {
            self.base_topic = src.base_topic.clone();
        }
        if has("provider") {
            self.provider = src.provider.clone();
        }
        if has("downlink_push") {
            self.downlink_push = src.downlink_push.clone();
        }
        if has("downlink_replace") {
            self.downlink_replace = src.downlink_replace.clone();
        }
        if has("up_topics") {
            self.up_topics = src.up_topics.clone();
            return;
        }
        for kind in MESSAGE_KINDS.iter().filter(|k| has(**k)) {
            match src.up_topics.get(*kind) {
                Some(message) => {
                    self.up_topics.insert(kind.to_string(), message.clone());
                }
                None => {
                    self.up_topics.remove(*kind);
                }
            }
        }
    }

    /// Full topic for an upstream message kind, if configured.
    pub fn up_topic(&self, kind: &str) -> Option<String> {
        if !MESSAGE_KINDS.contains(&kind) {
            return None;
        }
        self.up_topics
            .get(kind)
            .map(|m| join_topic(&self.base_topic, &m.topic))
    }
}

/// Joins a base topic and a sub topic with a single `/`.
pub fn join_topic(base: &str, topic: &str) -> String {
    match (base.trim_end_matches('/'), topic.trim_start_matches('/')) {
        ("", t) => t.to_string(),
        (b, "") => b.to_string(),
        (b, t) => format!("{}/{}", b, t),
    }
}
