use prost_types::{FieldMask, Timestamp};
use std::collections::HashMap;

use super::convert::{datetime_to_timestamp, timestamp_to_datetime};
use super::identifiers::{
    from_proto_webhook_ids, to_proto_webhook_ids, ApplicationIdentifiers,
    ApplicationWebhookIdentifiers,
};
use super::traffic::ErrorDetails;
use crate::domain::{self, DomainError, DomainResult};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookMessage {
    #[prost(string, tag = "1")]
    pub path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookHealthStatusHealthy {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookHealthStatusUnhealthy {
    #[prost(uint64, tag = "1")]
    pub failed_attempts: u64,
    #[prost(message, optional, tag = "2")]
    pub last_failed_attempt_at: Option<Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub last_failed_attempt_details: Option<ErrorDetails>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookHealth {
    #[prost(oneof = "application_webhook_health::Status", tags = "1, 2")]
    pub status: Option<application_webhook_health::Status>,
}

pub mod application_webhook_health {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Status {
        #[prost(message, tag = "1")]
        Healthy(super::ApplicationWebhookHealthStatusHealthy),
        #[prost(message, tag = "2")]
        Unhealthy(super::ApplicationWebhookHealthStatusUnhealthy),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhook {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationWebhookIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub created_at: Option<Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub updated_at: Option<Timestamp>,
    #[prost(string, tag = "4")]
    pub base_url: String,
    #[prost(map = "string, string", tag = "5")]
    pub headers: HashMap<String, String>,
    #[prost(string, tag = "6")]
    pub format: String,
    #[prost(string, tag = "7")]
    pub template_id: String,
    #[prost(string, tag = "8")]
    pub downlink_api_key: String,
    #[prost(message, optional, tag = "9")]
    pub uplink_message: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "10")]
    pub uplink_normalized: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "11")]
    pub join_accept: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "12")]
    pub downlink_ack: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "13")]
    pub downlink_nack: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "14")]
    pub downlink_sent: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "15")]
    pub downlink_failed: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "16")]
    pub downlink_queued: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "17")]
    pub downlink_queue_invalidated: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "18")]
    pub location_solved: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "19")]
    pub service_data: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "20")]
    pub health_status: Option<ApplicationWebhookHealth>,
    #[prost(message, optional, tag = "21")]
    pub field_mask: Option<FieldMask>,
    #[prost(bool, tag = "22")]
    pub paused: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhooks {
    #[prost(message, repeated, tag = "1")]
    pub webhooks: Vec<ApplicationWebhook>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetApplicationWebhookRequest {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationWebhookIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListApplicationWebhooksRequest {
    #[prost(message, optional, tag = "1")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetApplicationWebhookRequest {
    #[prost(message, optional, tag = "1")]
    pub webhook: Option<ApplicationWebhook>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookFormats {
    #[prost(map = "string, string", tag = "1")]
    pub formats: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookTemplate {
    #[prost(string, tag = "1")]
    pub template_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, tag = "4")]
    pub base_url: String,
    #[prost(string, tag = "5")]
    pub format: String,
    #[prost(map = "string, string", tag = "6")]
    pub headers: HashMap<String, String>,
    #[prost(message, optional, tag = "7")]
    pub uplink_message: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "8")]
    pub join_accept: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "9")]
    pub downlink_ack: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "10")]
    pub downlink_nack: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "11")]
    pub downlink_failed: Option<ApplicationWebhookMessage>,
    #[prost(message, optional, tag = "12")]
    pub location_solved: Option<ApplicationWebhookMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookTemplates {
    #[prost(message, repeated, tag = "1")]
    pub templates: Vec<ApplicationWebhookTemplate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetApplicationWebhookTemplateRequest {
    #[prost(string, tag = "1")]
    pub template_id: String,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListApplicationWebhookTemplatesRequest {
    #[prost(message, optional, tag = "1")]
    pub field_mask: Option<FieldMask>,
}

fn to_proto_message(m: Option<domain::WebhookMessage>) -> Option<ApplicationWebhookMessage> {
    m.map(|m| ApplicationWebhookMessage { path: m.path })
}

fn from_proto_message(m: Option<ApplicationWebhookMessage>) -> Option<domain::WebhookMessage> {
    m.map(|m| domain::WebhookMessage { path: m.path })
}

fn to_proto_health(status: domain::HealthStatus) -> ApplicationWebhookHealth {
    use application_webhook_health::Status;
    let status = match status {
        domain::HealthStatus::Healthy => {
            Status::Healthy(ApplicationWebhookHealthStatusHealthy {})
        }
        domain::HealthStatus::Unhealthy {
            failed_attempts,
            last_failed_at,
            last_error,
        } => Status::Unhealthy(ApplicationWebhookHealthStatusUnhealthy {
            failed_attempts,
            last_failed_attempt_at: datetime_to_timestamp(Some(last_failed_at)),
            last_failed_attempt_details: last_error.map(|e| ErrorDetails {
                namespace: e.namespace,
                name: e.name,
                message_format: e.message_format,
                code: e.code,
            }),
        }),
    };
    ApplicationWebhookHealth {
        status: Some(status),
    }
}

fn from_proto_health(health: ApplicationWebhookHealth) -> Option<domain::HealthStatus> {
    use application_webhook_health::Status;
    match health.status? {
        Status::Healthy(_) => Some(domain::HealthStatus::Healthy),
        Status::Unhealthy(u) => Some(domain::HealthStatus::Unhealthy {
            failed_attempts: u.failed_attempts,
            last_failed_at: timestamp_to_datetime(u.last_failed_attempt_at).unwrap_or_default(),
            last_error: u.last_failed_attempt_details.map(|e| domain::ErrorDetails {
                namespace: e.namespace,
                name: e.name,
                message_format: e.message_format,
                code: e.code,
            }),
        }),
    }
}

pub fn to_proto_webhook(w: domain::Webhook) -> ApplicationWebhook {
    let m = w.messages;
    ApplicationWebhook {
        ids: Some(to_proto_webhook_ids(w.ids)),
        created_at: datetime_to_timestamp(w.created_at),
        updated_at: datetime_to_timestamp(w.updated_at),
        base_url: w.base_url,
        headers: w.headers,
        format: w.format.as_str().to_string(),
        template_id: w.template_id.unwrap_or_default(),
        downlink_api_key: w.downlink_api_key.unwrap_or_default(),
        uplink_message: to_proto_message(m.uplink_message),
        uplink_normalized: to_proto_message(m.uplink_normalized),
        join_accept: to_proto_message(m.join_accept),
        downlink_ack: to_proto_message(m.downlink_ack),
        downlink_nack: to_proto_message(m.downlink_nack),
        downlink_sent: to_proto_message(m.downlink_sent),
        downlink_failed: to_proto_message(m.downlink_failed),
        downlink_queued: to_proto_message(m.downlink_queued),
        downlink_queue_invalidated: to_proto_message(m.downlink_queue_invalidated),
        location_solved: to_proto_message(m.location_solved),
        service_data: to_proto_message(m.service_data),
        health_status: w.health_status.map(to_proto_health),
        field_mask: if w.field_mask.is_empty() {
            None
        } else {
            Some(FieldMask {
                paths: w.field_mask,
            })
        },
        paused: w.paused,
    }
}

fn from_proto_format(format: &str) -> DomainResult<domain::WebhookFormat> {
    if format.is_empty() {
        return Ok(domain::WebhookFormat::default());
    }
    domain::WebhookFormat::parse(format)
        .ok_or_else(|| DomainError::InvalidArgument(format!("unknown webhook format `{}`", format)))
}

pub fn from_proto_webhook(w: ApplicationWebhook) -> DomainResult<domain::Webhook> {
    Ok(domain::Webhook {
        ids: from_proto_webhook_ids(w.ids)?,
        base_url: w.base_url,
        format: from_proto_format(&w.format)?,
        headers: w.headers,
        field_mask: w.field_mask.map(|m| m.paths).unwrap_or_default(),
        messages: domain::WebhookMessagePaths {
            uplink_message: from_proto_message(w.uplink_message),
            uplink_normalized: from_proto_message(w.uplink_normalized),
            join_accept: from_proto_message(w.join_accept),
            downlink_ack: from_proto_message(w.downlink_ack),
            downlink_nack: from_proto_message(w.downlink_nack),
            downlink_sent: from_proto_message(w.downlink_sent),
            downlink_failed: from_proto_message(w.downlink_failed),
            downlink_queued: from_proto_message(w.downlink_queued),
            downlink_queue_invalidated: from_proto_message(w.downlink_queue_invalidated),
            location_solved: from_proto_message(w.location_solved),
            service_data: from_proto_message(w.service_data),
        },
        downlink_api_key: Some(w.downlink_api_key).filter(|k| !k.is_empty()),
        paused: w.paused,
        health_status: w.health_status.and_then(from_proto_health),
        template_id: Some(w.template_id).filter(|t| !t.is_empty()),
        created_at: timestamp_to_datetime(w.created_at),
        updated_at: timestamp_to_datetime(w.updated_at),
    })
}

pub fn to_proto_template(t: domain::WebhookTemplate) -> ApplicationWebhookTemplate {
    let m = t.messages;
    ApplicationWebhookTemplate {
        template_id: t.template_id,
        name: t.name,
        description: t.description,
        base_url: t.base_url,
        format: t.format.as_str().to_string(),
        headers: t.headers,
        uplink_message: to_proto_message(m.uplink_message),
        join_accept: to_proto_message(m.join_accept),
        downlink_ack: to_proto_message(m.downlink_ack),
        downlink_nack: to_proto_message(m.downlink_nack),
        downlink_failed: to_proto_message(m.downlink_failed),
        location_solved: to_proto_message(m.location_solved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_webhook_conversion() {
        let webhook = domain::Webhook {
            ids: domain::ApplicationWebhookIdentifiers::new("foo-app", "foo-hook"),
            base_url: "https://example.com/{appID}".to_string(),
            format: domain::WebhookFormat::Protobuf,
            messages: domain::WebhookMessagePaths {
                uplink_message: Some(domain::WebhookMessage {
                    path: "/up".to_string(),
                }),
                ..Default::default()
            },
            downlink_api_key: Some("secret".to_string()),
            health_status: Some(domain::HealthStatus::Unhealthy {
                failed_attempts: 3,
                last_failed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                last_error: None,
            }),
            ..Default::default()
        };

        let back = from_proto_webhook(to_proto_webhook(webhook.clone())).unwrap();

        assert_eq!(back, webhook);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let proto = ApplicationWebhook {
            ids: Some(to_proto_webhook_ids(
                domain::ApplicationWebhookIdentifiers::new("foo-app", "foo-hook"),
            )),
            format: "xml".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            from_proto_webhook(proto),
            Err(DomainError::InvalidArgument(_))
        ));
    }
}
