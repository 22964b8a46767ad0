//! HTTP routes webhook targets call to schedule downlinks.

use application_server::domain::{message_format, DownlinkQueueService};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use common::auth::{authorize_application, Right, RightsFetcher};
use common::domain::{ApplicationWebhookIdentifiers, DomainError, EndDeviceIdentifiers};
use common::registry::WebhookRegistry;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{RateLimitKey, RateLimiter};

pub const DOWNLINK_ROUTE: &str =
    "/api/v3/as/applications/:application_id/webhooks/:webhook_id/devices/:device_id/down/:operation";

/// Shared state of the downlink routes.
#[derive(Clone)]
pub struct DownlinkIngress {
    pub webhooks: Arc<dyn WebhookRegistry>,
    pub queue: DownlinkQueueService,
    pub rights: Arc<dyn RightsFetcher>,
    pub limiter: Arc<RateLimiter>,
}

pub fn downlink_router(ingress: DownlinkIngress) -> Router {
    Router::new()
        .route(DOWNLINK_ROUTE, post(handle_downlink))
        .with_state(ingress)
}

/// Error returned by the downlink routes, rendered as `{code, message}`.
#[derive(Debug)]
pub enum IngressError {
    Domain(DomainError),
    WebhookPaused,
}

impl From<DomainError> for IngressError {
    fn from(error: DomainError) -> Self {
        IngressError::Domain(error)
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            IngressError::WebhookPaused => (
                StatusCode::NOT_ACCEPTABLE,
                "webhook_paused",
                "webhook is paused".to_string(),
            ),
            IngressError::Domain(error) => {
                let status = match &error {
                    DomainError::InvalidArgument(_)
                    | DomainError::FailedPrecondition(_)
                    | DomainError::DownlinkQueueOperation { .. } => StatusCode::BAD_REQUEST,
                    DomainError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                    DomainError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                    DomainError::NotFound(_) => StatusCode::NOT_FOUND,
                    DomainError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
                    DomainError::Aborted(_) | DomainError::AlreadyExists(_) => StatusCode::CONFLICT,
                    DomainError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    DomainError::Corruption(_) | DomainError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    warn!(error = %error, "downlink request failed");
                }
                (status, error.tag(), error.name())
            }
        };
        (status, Json(json!({ "code": code, "message": message }))).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Push,
    Replace,
}

impl Operation {
    fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "push" => Ok(Operation::Push),
            "replace" => Ok(Operation::Replace),
            other => Err(DomainError::NotFound(format!("unknown operation `{}`", other))),
        }
    }
}

async fn handle_downlink(
    State(ingress): State<DownlinkIngress>,
    Path((application_id, webhook_id, device_id, operation)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, IngressError> {
    let operation = Operation::parse(&operation)?;
    let device_ids = EndDeviceIdentifiers::new(application_id.clone(), device_id);
    device_ids.validate()?;
    let webhook_ids = ApplicationWebhookIdentifiers::new(application_id, webhook_id);
    webhook_ids.validate()?;

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let auth = authorize_application(
        ingress.rights.as_ref(),
        authorization,
        &device_ids.application_ids,
        &[Right::ApplicationTrafficDownWrite],
    )
    .await?;

    ingress.limiter.try_acquire(&RateLimitKey {
        application_id: device_ids.application_ids.application_id.clone(),
        device_id: device_ids.device_id.clone(),
        token_id: auth.token_id,
    })?;

    let webhook = ingress
        .webhooks
        .get(&webhook_ids, &["format".to_string(), "paused".to_string()])
        .await?;
    if webhook.paused {
        return Err(IngressError::WebhookPaused);
    }

    let downlinks = message_format(webhook.format).to_downlinks(&body)?;
    debug!(
        device = %device_ids.unique_id(),
        webhook = %webhook_ids.webhook_id,
        count = downlinks.len(),
        ?operation,
        "downlinks received from webhook"
    );
    match operation {
        Operation::Push => ingress.queue.push(&device_ids, downlinks).await?,
        Operation::Replace => ingress.queue.replace(&device_ids, downlinks).await?,
    }
    Ok(StatusCode::OK)
}
