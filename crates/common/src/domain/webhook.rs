use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{field_mask, ApplicationWebhookIdentifiers, ErrorDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    #[default]
    Json,
    Protobuf,
}

impl WebhookFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookFormat::Json => "json",
            WebhookFormat::Protobuf => "protobuf",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(WebhookFormat::Json),
            "protobuf" => Some(WebhookFormat::Protobuf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebhookMessage {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy {
        failed_attempts: u64,
        last_failed_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<ErrorDetails>,
    },
}

/// Per-message-kind paths. A kind without a path is not delivered.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebhookMessagePaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uplink_message: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uplink_normalized: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_accept: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_ack: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_nack: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_sent: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_failed: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_queued: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_queue_invalidated: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_solved: Option<WebhookMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_data: Option<WebhookMessage>,
}

impl WebhookMessagePaths {
    /// Looks up the configured message for an up kind (see `Up::name`).
    pub fn for_kind(&self, kind: &str) -> Option<&WebhookMessage> {
        match kind {
            "uplink_message" => self.uplink_message.as_ref(),
            "uplink_normalized" => self.uplink_normalized.as_ref(),
            "join_accept" => self.join_accept.as_ref(),
            "downlink_ack" => self.downlink_ack.as_ref(),
            "downlink_nack" => self.downlink_nack.as_ref(),
            "downlink_sent" => self.downlink_sent.as_ref(),
            "downlink_failed" => self.downlink_failed.as_ref(),
            "downlink_queued" => self.downlink_queued.as_ref(),
            "downlink_queue_invalidated" => self.downlink_queue_invalidated.as_ref(),
            "location_solved" => self.location_solved.as_ref(),
            "service_data" => self.service_data.as_ref(),
            _ => None,
        }
    }
}

pub const MESSAGE_KINDS: &[&str] = &[
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

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Webhook {
    pub ids: ApplicationWebhookIdentifiers,
    pub base_url: String,
    #[serde(default)]
    pub format: WebhookFormat,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_mask: Vec<String>,
    #[serde(default, flatten)]
    pub messages: WebhookMessagePaths,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_api_key: Option<String>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

pub const WEBHOOK_FIELD_PATHS: &[&str] = &[
    "ids",
    "base_url",
    "format",
    "headers",
    "field_mask",
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
    "downlink_api_key",
    "paused",
    "health_status",
    "template_id",
];

impl Webhook {
    pub fn masked(&self, paths: &[String]) -> Webhook {
        if paths.is_empty() {
            return self.clone();
        }
        let mut out = Webhook {
            ids: self.ids.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            ..Default::default()
        };
        out.set_fields(self, paths);
        out
    }

    pub fn set_fields(&mut self, src: &Webhook, paths: &[String]) {
        let has = |p: &str| field_mask::has_path(paths, p);
        if has("base_url") {
            self.base_url = src.base_url.clone();
        }
        if has("format") {
            self.format = src.format;
        }
        if has("headers") {
            self.headers = src.headers.clone();
        }
        if has("field_mask") {
            self.field_mask = src.field_mask.clone();
        }
        for kind in MESSAGE_KINDS {
            if has(kind) {
                let value = src.messages.for_kind(kind).cloned();
                let slot = match *kind {
                    "uplink_message" => &mut self.messages.uplink_message,
                    "uplink_normalized" => &mut self.messages.uplink_normalized,
                    "join_accept" => &mut self.messages.join_accept,
                    "downlink_ack" => &mut self.messages.downlink_ack,
                    "downlink_nack" => &mut self.messages.downlink_nack,
                    "downlink_sent" => &mut self.messages.downlink_sent,
                    "downlink_failed" => &mut self.messages.downlink_failed,
                    "downlink_queued" => &mut self.messages.downlink_queued,
                    "downlink_queue_invalidated" => &mut self.messages.downlink_queue_invalidated,
                    "location_solved" => &mut self.messages.location_solved,
                    _ => &mut self.messages.service_data,
                };
                *slot = value;
            }
        }
        if has("downlink_api_key") {
            self.downlink_api_key = src.downlink_api_key.clone();
        }
        if has("paused") {
            self.paused = src.paused;
        }
        if has("health_status") {
            self.health_status = src.health_status.clone();
        }
        if has("template_id") {
            self.template_id = src.template_id.clone();
        }
    }
}

/// Predefined webhook configuration offered to users.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebhookTemplate {
    pub template_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_url: String,
    #[serde(default)]
    pub format: WebhookFormat,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, flatten)]
    pub messages: WebhookMessagePaths,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_kind() {
        let paths = WebhookMessagePaths {
            uplink_message: Some(WebhookMessage {
                path: "/up".to_string(),
            }),
            ..Default::default()
        };

        assert_eq!(paths.for_kind("uplink_message").unwrap().path, "/up");
        assert!(paths.for_kind("join_accept").is_none());
    }

    #[test]
    fn test_set_fields_message_paths() {
        let src = Webhook {
            base_url: "https://example.com".to_string(),
            messages: WebhookMessagePaths {
                join_accept: Some(WebhookMessage {
                    path: "/join".to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut dst = Webhook::default();

        dst.set_fields(&src, &["join_accept".to_string()]);

        assert_eq!(dst.messages.join_accept, src.messages.join_accept);
        assert!(dst.base_url.is_empty());
    }

    #[test]
    fn test_health_status_serde() {
        let status = HealthStatus::Unhealthy {
            failed_attempts: 2,
            last_failed_at: Utc::now(),
            last_error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["failed_attempts"], 2);
    }
}
