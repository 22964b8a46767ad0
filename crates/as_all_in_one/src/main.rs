mod config;

use application_server::domain::{
    last_seen_provider, ActivationPool, ClusterDistributor, ClusterDistributorConfig,
    DeviceService, Distributor, DownlinkQueueService, EntityRegistry, InMemoryEntityRegistry,
    InMemoryFormatterRepository, JoinServer, KeyService, KeyServiceConfig, LastSeenConfig,
    LinkService, LocalDistributor, LocalDistributorConfig, LocationFetcher, LocationFetcherConfig,
    PackageService, PayloadFormatterService, SessionManager, UpstreamHandler, UpstreamHandlerDeps,
};
use application_server::{
    build_as_routes, peer_channel, uplink_pool, AppAsHandler, AsApi, AsEndDeviceRegistryHandler,
    AsGrpcServices, AsHandler, GrpcEntityRegistry, GrpcJoinServer, GrpcNetworkServer,
    InteropClient, InteropClientConfig, NsAsHandler, NsUplinkStream, PackageRegistryHandler,
};
use common::auth::{parse_api_keys, ClusterAuth, RightsFetcher, StaticRightsFetcher};
use common::clock::{Clock, SystemClock};
use common::crypto::MemKeyVault;
use common::domain::ApplicationLink;
use common::grpc::{CorsConfig, GrpcLoggingConfig, GrpcServerConfig, GrpcTracingConfig};
use common::metrics::AsMetrics;
use common::nats::{ConsumerConfig, NatsClient};
use common::proto::application_pub_sub_registry_server::ApplicationPubSubRegistryServer;
use common::proto::application_webhook_registry_server::ApplicationWebhookRegistryServer;
use common::proto::application_webhook_template_registry_server::ApplicationWebhookTemplateRegistryServer;
use common::registry::{
    InMemoryDeviceRegistry, InMemoryLinkRegistry, InMemoryLocationCache, InMemoryPackageRegistry,
    InMemoryPubSubRegistry, InMemoryUplinkRegistry, InMemoryWebhookRegistry,
};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use common::workerpool::WorkerPoolConfig;
use config::AsConfig;
use payload::ScriptRunner;
use pubsub::{
    IntegrationDeps, ProviderConfig, Providers, PubSubManager, PubSubManagerConfig,
    PubSubRegistryHandler, PubSubService,
};
use runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use webhook::{
    downlink_router, DownlinkAnnouncement, DownlinkIngress, HealthCheckConfig, HealthCheckSink,
    HttpClientSink, PooledSink, RateLimitConfig, RateLimiter, TemplateRegistryHandler,
    TemplateStore, WebhookHealthRegistry, WebhookIntegration, WebhookRegistryHandler,
    WebhookService,
};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match AsConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting application server"
    );
    debug!(
        grpc_port = config.grpc_port,
        http_port = config.http_port,
        nats_url = %config.nats_url,
        "Configuration loaded"
    );

    // Background tasks (pools, batchers, integrations) stop after the
    // runner's processes.
    let background = CancellationToken::new();
    let app = match build_application(&config, background.clone()).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize application server");
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let Application {
        api,
        http,
        webhooks,
        webhook_sink,
        pubsub,
        nats_client,
        distributor,
    } = app;

    let mut runner = Runner::new();

    for (name, process) in api.into_runner_processes() {
        runner = runner.with_app_process(name, process);
    }

    let http_addr = format!("{}:{}", config.http_host, config.http_port);
    runner = runner.with_app_process("as-http", move |token| async move {
        run_http_server(http_addr, http, token).await
    });

    runner = runner.with_app_process("webhooks", move |token| async move {
        webhooks.run(distributor, token).await?;
        Ok(())
    });

    let pubsub_for_close = pubsub.clone();
    runner = runner.with_app_process("pubsub", move |token| async move {
        pubsub.start_all().await?;
        token.cancelled().await;
        Ok(())
    });

    runner = runner
        .with_closer("cleanup", move || async move {
            info!("Running cleanup tasks...");
            pubsub_for_close.shutdown().await;
            webhook_sink.shutdown().await;
            background.cancel();
            if let Ok(client) = Arc::try_unwrap(nats_client) {
                client.close().await;
            }

            // Shutdown telemetry and flush pending traces and logs
            shutdown_telemetry(telemetry_providers);

            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(config.shutdown_timeout());

    if let Err(e) = runner.run().await {
        error!(error = %format!("{:#}", e), "application server stopped with error");
        std::process::exit(1);
    }
}

/// Everything the runner drives, built from the configuration.
struct Application {
    api: AsApi,
    http: axum::Router,
    webhooks: Arc<WebhookIntegration>,
    webhook_sink: Arc<PooledSink>,
    pubsub: Arc<PubSubManager>,
    nats_client: Arc<NatsClient>,
    distributor: Arc<dyn Distributor>,
}

async fn build_application(
    config: &AsConfig,
    background: CancellationToken,
) -> anyhow::Result<Application> {
    let metrics = AsMetrics::shared();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lock_ttl = Duration::from_secs(config.registry_lock_ttl_secs);

    // NATS initialization
    info!("Connecting to NATS...");
    let nats_client = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.nats_connect_timeout_secs),
        )
        .await?,
    );
    if config.ns_uplink_stream_enabled {
        nats_client
            .ensure_stream(
                &config.ns_uplink_stream,
                vec![config.ns_uplink_subject.clone()],
            )
            .await?;
    }

    // Cluster peers
    let cluster = ClusterAuth::from_hex_list(&config.cluster_keys)?;
    let peer_timeout = Duration::from_secs(config.peer_timeout_secs);
    let network_server = Arc::new(GrpcNetworkServer::new(
        peer_channel(&config.network_server_address, peer_timeout)?,
        cluster.clone(),
    ));
    let entities: Arc<dyn EntityRegistry> = if config.entity_registry_address.is_empty() {
        Arc::new(InMemoryEntityRegistry::new())
    } else {
        Arc::new(GrpcEntityRegistry::new(
            peer_channel(&config.entity_registry_address, peer_timeout)?,
            cluster.clone(),
        ))
    };
    let join_server: Option<Arc<dyn JoinServer>> = if config.join_server_address.is_empty() {
        None
    } else {
        Some(Arc::new(GrpcJoinServer::new(
            peer_channel(&config.join_server_address, peer_timeout)?,
            cluster.clone(),
        )))
    };
    let interop: Option<Arc<dyn JoinServer>> = if config.interop_url.is_empty() {
        None
    } else {
        Some(Arc::new(InteropClient::new(InteropClientConfig {
            url: config.interop_url.clone(),
            as_id: config.interop_as_id.clone(),
            timeout: peer_timeout,
        })?))
    };

    // Registries
    let devices = Arc::new(InMemoryDeviceRegistry::new(lock_ttl));
    let links = Arc::new(InMemoryLinkRegistry::new(lock_ttl));
    let uplinks = Arc::new(InMemoryUplinkRegistry::new(config.uplink_storage_limit));
    let webhook_registry = Arc::new(InMemoryWebhookRegistry::new(lock_ttl));
    let pubsub_registry = Arc::new(InMemoryPubSubRegistry::new(lock_ttl));
    let package_registry = Arc::new(InMemoryPackageRegistry::new(lock_ttl));
    let rights: Arc<dyn RightsFetcher> =
        Arc::new(StaticRightsFetcher::new(parse_api_keys(&config.api_keys)?));

    // Domain services
    let default_link = ApplicationLink {
        skip_payload_crypto: config.default_skip_payload_crypto,
        ..Default::default()
    };
    let keys = Arc::new(KeyService::new(
        Arc::new(MemKeyVault::new(config.keks()?)),
        join_server,
        interop,
        KeyServiceConfig {
            kek_label: config.kek_label.clone(),
            local_session_key_id_prefix: config.local_session_key_id_prefix()?,
        },
    ));
    let formatters = Arc::new(PayloadFormatterService::new(
        ScriptRunner::new(Duration::from_millis(config.formatter_script_timeout_ms)),
        Arc::new(InMemoryFormatterRepository::default()),
    ));
    let queue = DownlinkQueueService::new(
        devices.clone(),
        links.clone(),
        default_link.clone(),
        network_server,
        keys.clone(),
        formatters.clone(),
        metrics.clone(),
    );

    let local_distributor: Arc<dyn Distributor> = Arc::new(LocalDistributor::new(
        LocalDistributorConfig {
            buffer_size: config.distributor_buffer_size,
            blocking: config.distributor_blocking,
        },
        metrics.clone(),
    ));
    let cluster_distributor: Arc<dyn Distributor> = Arc::new(ClusterDistributor::new(
        nats_client.message_bus(),
        ClusterDistributorConfig {
            subject_prefix: config.cluster_subject_prefix.clone(),
            buffer_size: config.distributor_buffer_size,
            blocking: config.distributor_blocking,
            timeout: Duration::from_secs(config.distributor_timeout_secs),
        },
        metrics.clone(),
        background.clone(),
    ));

    let upstream = UpstreamHandler::new(UpstreamHandlerDeps {
        devices: devices.clone(),
        links: links.clone(),
        default_link: default_link.clone(),
        sessions: SessionManager::new(keys.clone()),
        formatters,
        queue: queue.clone(),
        uplinks: uplinks.clone(),
        locations: Arc::new(LocationFetcher::new(
            entities.clone(),
            Arc::new(InMemoryLocationCache::new(clock.clone())),
            LocationFetcherConfig {
                cache_ttl: Duration::from_secs(config.location_cache_ttl_secs),
                error_ttl: Duration::from_secs(config.location_error_ttl_secs),
            },
        )),
        activation: ActivationPool::new(
            pool_config("activation", config.activation_pool_max_workers, 64),
            devices.clone(),
            entities.clone(),
            metrics.clone(),
            background.clone(),
        ),
        last_seen: last_seen_provider(
            entities,
            LastSeenConfig {
                batch_size: config.last_seen_batch_size,
                flush_interval: Duration::from_secs(config.last_seen_flush_interval_secs),
            },
            background.clone(),
        ),
        distributors: vec![local_distributor.clone(), cluster_distributor.clone()],
        clock: clock.clone(),
        metrics: metrics.clone(),
    });

    // gRPC services
    let mut routes = build_as_routes(AsGrpcServices {
        link: AsHandler::new(
            Arc::new(LinkService::new(
                links,
                default_link,
                config.formatter_max_parameter_length,
            )),
            rights.clone(),
        ),
        ns_as: NsAsHandler::new(
            uplink_pool(
                upstream.clone(),
                metrics.clone(),
                pool_config(
                    "ns_as_uplinks",
                    config.uplink_pool_max_workers,
                    config.uplink_pool_queue_size,
                ),
                background.clone(),
            ),
            cluster,
            metrics.clone(),
        ),
        devices: AsEndDeviceRegistryHandler::new(
            Arc::new(DeviceService::new(
                devices,
                uplinks,
                keys,
                config.formatter_max_parameter_length,
            )),
            rights.clone(),
        ),
        app_as: AppAsHandler::new(queue.clone(), cluster_distributor, rights.clone()),
        packages: PackageRegistryHandler::new(
            Arc::new(PackageService::new(package_registry, config.packages()?)),
            rights.clone(),
        ),
    });

    // Webhooks
    let templates = load_templates(&config.webhook_templates_file)?;
    let webhook_sink = Arc::new(PooledSink::new(
        Arc::new(HealthCheckSink::new(
            Arc::new(HttpClientSink::new(Duration::from_secs(
                config.webhook_timeout_secs,
            ))?),
            Arc::new(WebhookHealthRegistry::new(webhook_registry.clone())),
            clock,
            HealthCheckConfig {
                threshold: config.webhook_unhealthy_attempts_threshold,
                retry_interval: Duration::from_secs(config.webhook_unhealthy_retry_interval_secs),
            },
        )),
        pool_config(
            "webhooks",
            config.webhook_pool_max_workers,
            config.webhook_pool_queue_size,
        ),
        metrics.clone(),
        background.clone(),
    ));
    let webhooks = Arc::new(WebhookIntegration::new(
        webhook_registry.clone(),
        webhook_sink.clone(),
        DownlinkAnnouncement {
            public_address: config.webhook_downlink_public_address.clone(),
            domain: config.webhook_domain.clone(),
        },
        metrics.clone(),
    ));
    routes = routes
        .add_service(ApplicationWebhookRegistryServer::new(
            WebhookRegistryHandler::new(
                Arc::new(WebhookService::new(webhook_registry.clone())),
                rights.clone(),
            ),
        ))
        .add_service(ApplicationWebhookTemplateRegistryServer::new(
            TemplateRegistryHandler::new(Arc::new(templates)),
        ));
    let http = downlink_router(DownlinkIngress {
        webhooks: webhook_registry,
        queue: queue.clone(),
        rights: rights.clone(),
        limiter: Arc::new(RateLimiter::new(RateLimitConfig {
            rate: config.webhook_downlink_rate,
            burst: config.webhook_downlink_burst,
        })),
    });

    // Pub/sub
    let pubsub = Arc::new(PubSubManager::new(
        pubsub_registry.clone(),
        Providers::new(ProviderConfig {
            connect_timeout: Duration::from_secs(config.pubsub_connect_timeout_secs),
        }),
        IntegrationDeps {
            distributor: local_distributor.clone(),
            queue,
            metrics: metrics.clone(),
        },
        PubSubManagerConfig {
            retry_delay: Duration::from_secs(config.pubsub_retry_delay_secs),
            max_retry_attempts: config.pubsub_max_retry_attempts,
        },
        background.clone(),
    ));
    routes = routes.add_service(ApplicationPubSubRegistryServer::new(
        PubSubRegistryHandler::new(
            Arc::new(PubSubService::new(pubsub_registry, pubsub.clone())),
            rights,
        ),
    ));

    let mut api = AsApi::new(routes, grpc_config(config));
    if config.ns_uplink_stream_enabled {
        api = api.with_uplink_stream(NsUplinkStream::new(
            nats_client.create_consumer_client(),
            ConsumerConfig {
                stream_name: config.ns_uplink_stream.clone(),
                consumer_name: config.ns_uplink_consumer.clone(),
                subject_filter: config.ns_uplink_subject.clone(),
                batch_size: config.nats_batch_size,
                max_wait: Duration::from_secs(config.nats_batch_wait_secs),
            },
            pool_config("uplinks", config.uplink_pool_max_workers, config.uplink_pool_queue_size),
            upstream,
            metrics,
        ));
    }

    Ok(Application {
        api,
        http,
        webhooks,
        webhook_sink,
        pubsub,
        nats_client,
        distributor: local_distributor,
    })
}

fn pool_config(name: &str, max_workers: usize, queue_size: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        name: name.to_string(),
        max_workers,
        queue_size,
        ..Default::default()
    }
}

fn grpc_config(config: &AsConfig) -> GrpcServerConfig {
    let ignored_paths = config.ignored_paths();
    let mut cfg = GrpcServerConfig {
        host: config.grpc_host.clone(),
        port: config.grpc_port,
        logging_config: GrpcLoggingConfig {
            ignored_paths: ignored_paths.clone(),
        },
        tracing_config: GrpcTracingConfig { ignored_paths },
        enable_grpc_web: config.grpc_web_enabled,
        cors_config: None,
    };
    if config.grpc_web_enabled {
        cfg.cors_config = Some(CorsConfig::from_comma_separated(
            &config.grpc_cors_allowed_origins,
        ));
    }
    cfg
}

fn load_templates(path: &str) -> anyhow::Result<TemplateStore> {
    if path.is_empty() {
        return Ok(TemplateStore::default());
    }
    let data = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("failed to read webhook templates `{}`: {}", path, e))?;
    Ok(TemplateStore::from_json(&data)?)
}

async fn run_http_server(
    addr: String,
    router: axum::Router,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
