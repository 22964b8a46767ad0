//! Sinks deliver webhook requests. The production stack is
//! `PooledSink(HealthCheckSink(HttpClientSink))`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::domain::{DomainError, DomainResult, ErrorDetails, HealthStatus};
use common::metrics::{DropCause, SharedMetrics};
use common::workerpool::{WorkerPool, WorkerPoolConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{HealthCheckConfig, HealthStatusRegistry, WebhookRequest};

/// Upper bound of the response body kept as error detail.
const MAX_RESPONSE_BODY: usize = 1024;

pub const WEBHOOK_DISABLED: &str = "webhook_disabled";

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    async fn process(&self, request: WebhookRequest) -> DomainResult<()>;
}

/// POSTs requests over HTTP. Any 2xx response is a success.
pub struct HttpClientSink {
    client: reqwest::Client,
}

impl HttpClientSink {
    pub fn new(timeout: Duration) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Internal(e.into()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Sink for HttpClientSink {
    #[instrument(skip(self, request), fields(webhook = %request.ids.unique_id(), url = %request.url))]
    async fn process(&self, request: WebhookRequest) -> DomainResult<()> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let mut response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| DomainError::Unavailable(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = %status, "webhook delivered");
            return Ok(());
        }

        let mut body = Vec::new();
        while let Ok(Some(chunk)) = response.chunk().await {
            let room = MAX_RESPONSE_BODY - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_RESPONSE_BODY {
                break;
            }
        }
        Err(DomainError::Unavailable(format!(
            "webhook responded with {}: {}",
            status,
            String::from_utf8_lossy(&body)
        )))
    }
}

/// Tracks the health status of the target webhook and stops calling it
/// for `retry_interval` once `threshold` consecutive attempts failed.
pub struct HealthCheckSink {
    inner: Arc<dyn Sink>,
    registry: Arc<dyn HealthStatusRegistry>,
    clock: Arc<dyn Clock>,
    config: HealthCheckConfig,
}

impl HealthCheckSink {
    pub fn new(
        inner: Arc<dyn Sink>,
        registry: Arc<dyn HealthStatusRegistry>,
        clock: Arc<dyn Clock>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            inner,
            registry,
            clock,
            config,
        }
    }

    fn disabled(&self, status: Option<&HealthStatus>) -> bool {
        if self.config.monitor_only() {
            return false;
        }
        match status {
            Some(HealthStatus::Unhealthy {
                failed_attempts,
                last_failed_at,
                ..
            }) if *failed_attempts >= self.config.threshold => {
                // A negative elapsed time counts as still cooling down.
                let elapsed = (self.clock.now() - *last_failed_at)
                    .to_std()
                    .unwrap_or_default();
                elapsed < self.config.retry_interval
            }
            _ => false,
        }
    }
}

/// Health status after an attempt, given the status stored when the
/// attempt completed. `failure` carries the error of a failed attempt.
/// `None` leaves a healthy webhook untouched.
fn next_status(
    current: Option<&HealthStatus>,
    failure: Option<ErrorDetails>,
    now: DateTime<Utc>,
) -> Option<HealthStatus> {
    match (current, failure) {
        (Some(HealthStatus::Healthy), None) => None,
        (_, None) => Some(HealthStatus::Healthy),
        (current, Some(error)) => {
            let failed_attempts = match current {
                Some(HealthStatus::Unhealthy {
                    failed_attempts, ..
                }) => failed_attempts + 1,
                _ => 1,
            };
            Some(HealthStatus::Unhealthy {
                failed_attempts,
                last_failed_at: now,
                last_error: Some(error),
            })
        }
    }
}

#[async_trait]
impl Sink for HealthCheckSink {
    #[instrument(skip(self, request), fields(webhook = %request.ids.unique_id()))]
    async fn process(&self, request: WebhookRequest) -> DomainResult<()> {
        let ids = request.ids.clone();
        let current = self.registry.get(&ids).await?;
        if self.disabled(current.as_ref()) {
            debug!("webhook disabled, request not sent");
            return Err(DomainError::Aborted(WEBHOOK_DISABLED.to_string()));
        }

        let outcome = self.inner.process(request).await;

        let failure = outcome.as_ref().err().map(|err| ErrorDetails {
            namespace: "webhook".to_string(),
            name: err.tag().to_string(),
            message_format: err.name(),
            code: 0,
        });
        let now = self.clock.now();
        let update = Box::new(move |stored: Option<HealthStatus>| {
            next_status(stored.as_ref(), failure, now)
        });
        if let Err(e) = self.registry.update(&ids, update).await {
            warn!(error = %e, "failed to store webhook health status");
        }
        outcome
    }
}

/// Hands requests to a worker pool and returns immediately. Delivery
/// errors are recorded as drops.
pub struct PooledSink {
    pool: WorkerPool<WebhookRequest>,
}

impl PooledSink {
    pub fn new(
        inner: Arc<dyn Sink>,
        config: WorkerPoolConfig,
        metrics: SharedMetrics,
        token: CancellationToken,
    ) -> Self {
        let pool = WorkerPool::from_fn(config, token, move |request: WebhookRequest| {
            let inner = inner.clone();
            let metrics = metrics.clone();
            async move {
                let webhook = request.ids.unique_id();
                if let Err(e) = inner.process(request).await {
                    metrics.record_drop(DropCause::WebhookFailed, &format!("{}: {}", webhook, e));
                }
            }
        });
        Self { pool }
    }

    /// Waits for in-flight deliveries.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[async_trait]
impl Sink for PooledSink {
    async fn process(&self, request: WebhookRequest) -> DomainResult<()> {
        self.pool.publish(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WebhookHealthRegistry;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use bytes::Bytes;
    use common::clock::ManualClock;
    use common::domain::{ApplicationWebhookIdentifiers, Webhook};
    use common::metrics::AsMetrics;
    use common::registry::{InMemoryWebhookRegistry, Mutation, WebhookRegistry};
    use tokio::sync::mpsc;

    fn request(url: &str) -> WebhookRequest {
        WebhookRequest {
            ids: ApplicationWebhookIdentifiers::new("foo-app", "foo-hook"),
            url: url.to_string(),
            headers: vec![("X-Test".to_string(), "1".to_string())],
            body: Bytes::from_static(b"{}"),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_sink_success() {
        let base = serve(Router::new().route(
            "/up",
            post(|headers: axum::http::HeaderMap| async move {
                if headers.get("x-test").is_some() {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::BAD_REQUEST
                }
            }),
        ))
        .await;
        let sink = HttpClientSink::new(Duration::from_secs(5)).unwrap();

        sink.process(request(&format!("{}/up", base))).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_sink_error_body_is_bounded() {
        let base = serve(Router::new().route(
            "/up",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(4096)) }),
        ))
        .await;
        let sink = HttpClientSink::new(Duration::from_secs(5)).unwrap();

        let err = sink
            .process(request(&format!("{}/up", base)))
            .await
            .unwrap_err();

        assert!(err.is_unavailable());
        let message = err.name();
        assert!(message.contains("500"));
        assert_eq!(message.matches('x').count(), MAX_RESPONSE_BODY);
    }

    async fn health_registry() -> Arc<WebhookHealthRegistry> {
        let webhooks = Arc::new(InMemoryWebhookRegistry::default());
        let ids = ApplicationWebhookIdentifiers::new("foo-app", "foo-hook");
        webhooks
            .set(
                &ids.clone(),
                &[],
                Box::new(move |_| {
                    Ok(Mutation::Write {
                        value: Webhook {
                            ids,
                            base_url: "https://example.com".to_string(),
                            ..Default::default()
                        },
                        paths: vec!["base_url".to_string()],
                    })
                }),
            )
            .await
            .unwrap();
        Arc::new(WebhookHealthRegistry::new(webhooks))
    }

    fn hook() -> ApplicationWebhookIdentifiers {
        ApplicationWebhookIdentifiers::new("foo-app", "foo-hook")
    }

    #[tokio::test]
    async fn test_health_sink_first_failure_marks_unhealthy() {
        // Arrange
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let now = clock.now();
        let registry = health_registry().await;
        let mut inner = MockSink::new();
        inner
            .expect_process()
            .times(1)
            .returning(|_| Err(DomainError::Unavailable("boom".to_string())));
        let sink = HealthCheckSink::new(
            Arc::new(inner),
            registry.clone(),
            clock,
            HealthCheckConfig::default(),
        );

        // Act
        let result = sink.process(request("http://unused")).await;

        // Assert
        assert!(result.unwrap_err().is_unavailable());
        assert!(matches!(
            registry.get(&hook()).await.unwrap(),
            Some(HealthStatus::Unhealthy { failed_attempts: 1, last_failed_at, last_error: Some(_) })
                if last_failed_at == now
        ));
    }

    #[test]
    fn test_healthy_success_is_not_rewritten() {
        assert_eq!(next_status(Some(&HealthStatus::Healthy), None, Utc::now()), None);
        assert_eq!(
            next_status(None, None, Utc::now()),
            Some(HealthStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_monitor_only_never_short_circuits() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let last_failed_at = clock.now();
        let registry = health_registry().await;
        registry
            .update(
                &hook(),
                Box::new(move |_| {
                    Some(HealthStatus::Unhealthy {
                        failed_attempts: 100,
                        last_failed_at,
                        last_error: None,
                    })
                }),
            )
            .await
            .unwrap();
        let mut inner = MockSink::new();
        inner.expect_process().times(1).returning(|_| Ok(()));
        let sink = HealthCheckSink::new(
            Arc::new(inner),
            registry.clone(),
            clock,
            HealthCheckConfig {
                threshold: 0,
                retry_interval: Duration::from_secs(60),
            },
        );

        sink.process(request("http://unused")).await.unwrap();

        assert_eq!(
            registry.get(&hook()).await.unwrap(),
            Some(HealthStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_all_counted() {
        // Arrange
        struct SlowFailingSink;

        #[async_trait]
        impl Sink for SlowFailingSink {
            async fn process(&self, _request: WebhookRequest) -> DomainResult<()> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(DomainError::Unavailable("down".to_string()))
            }
        }

        let registry = health_registry().await;
        let sink = Arc::new(HealthCheckSink::new(
            Arc::new(SlowFailingSink),
            registry.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            HealthCheckConfig::default(),
        ));

        // Act
        let deliveries = (0..4).map(|_| {
            let sink = sink.clone();
            tokio::spawn(async move { sink.process(request("http://unused")).await })
        });
        for delivery in futures::future::join_all(deliveries).await {
            assert!(delivery.unwrap().is_err());
        }

        // Assert
        assert!(matches!(
            registry.get(&hook()).await.unwrap(),
            Some(HealthStatus::Unhealthy { failed_attempts: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_pooled_sink_records_failures() {
        let metrics = AsMetrics::shared();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut inner = MockSink::new();
        inner.expect_process().returning(move |_| {
            let _ = done_tx.send(());
            Err(DomainError::Unavailable("down".to_string()))
        });
        let sink = PooledSink::new(
            Arc::new(inner),
            WorkerPoolConfig::default(),
            metrics.clone(),
            CancellationToken::new(),
        );

        sink.process(request("http://unused")).await.unwrap();
        done_rx.recv().await.unwrap();
        sink.shutdown().await;

        assert_eq!(metrics.drops(DropCause::WebhookFailed), 1);
    }
}
