#![allow(dead_code)]

use application_server::domain::{
    ActivationPool, Distributor, DownlinkQueueService, InMemoryEntityRegistry,
    InMemoryFormatterRepository, KeyService, KeyServiceConfig, LocalDistributor,
    LocalDistributorConfig, LocationFetcher, LocationFetcherConfig, NoopLastSeen,
    PayloadFormatterService, SessionManager, Subscription, UpstreamHandler, UpstreamHandlerDeps,
};
use application_server::testing::InMemoryNetworkServer;
use common::clock::SystemClock;
use common::crypto::MemKeyVault;
use common::domain::{
    AesKey, ApplicationLink, ApplicationUp, DevAddr, EndDevice, EndDeviceIdentifiers, KeyEnvelope,
    Session, Up,
};
use common::metrics::{AsMetrics, SharedMetrics};
use common::registry::{
    DeviceRegistry, InMemoryDeviceRegistry, InMemoryLinkRegistry, InMemoryLocationCache,
    InMemoryUplinkRegistry, Mutation,
};
use common::workerpool::WorkerPoolConfig;
use payload::ScriptRunner;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const APP_ID: &str = "foo-app";
pub const DEVICE_ID: &str = "foo-device";

pub fn ids() -> EndDeviceIdentifiers {
    EndDeviceIdentifiers::new(APP_ID, DEVICE_ID)
}

pub fn ids_with_addr(dev_addr: DevAddr) -> EndDeviceIdentifiers {
    let mut ids = ids();
    ids.dev_addr = Some(dev_addr);
    ids
}

pub fn key(byte: u8) -> AesKey {
    AesKey([byte; 16])
}

pub fn addr(byte: u8) -> DevAddr {
    DevAddr([byte; 4])
}

pub fn session(session_key_id: &[u8], dev_addr: DevAddr, app_s_key: AesKey, last_a_f_cnt_down: u32) -> Session {
    let mut session = Session::new(dev_addr, session_key_id.to_vec(), KeyEnvelope::plain(app_s_key));
    session.last_a_f_cnt_down = last_a_f_cnt_down;
    session
}

/// Application Server wired against in-memory registries and an in-memory
/// Network Server.
pub struct Harness {
    pub devices: Arc<InMemoryDeviceRegistry>,
    pub network_server: Arc<InMemoryNetworkServer>,
    pub distributor: Arc<LocalDistributor>,
    pub queue: DownlinkQueueService,
    pub upstream: UpstreamHandler,
    pub metrics: SharedMetrics,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_link(ApplicationLink::default(), HashMap::new())
    }

    pub fn with_link(default_link: ApplicationLink, keks: HashMap<String, AesKey>) -> Self {
        let metrics = AsMetrics::shared();
        let devices = Arc::new(InMemoryDeviceRegistry::new(Duration::from_secs(5)));
        let links = Arc::new(InMemoryLinkRegistry::default());
        let network_server = Arc::new(InMemoryNetworkServer::new());
        let keys = Arc::new(KeyService::new(
            Arc::new(MemKeyVault::new(keks)),
            None,
            None,
            KeyServiceConfig::default(),
        ));
        let formatters = Arc::new(PayloadFormatterService::new(
            ScriptRunner::default(),
            Arc::new(InMemoryFormatterRepository::default()),
        ));
        let queue = DownlinkQueueService::new(
            devices.clone(),
            links.clone(),
            default_link.clone(),
            network_server.clone(),
            keys.clone(),
            formatters.clone(),
            metrics.clone(),
        );
        let entities = Arc::new(InMemoryEntityRegistry::new());
        let distributor = Arc::new(LocalDistributor::new(
            LocalDistributorConfig::default(),
            metrics.clone(),
        ));
        let upstream = UpstreamHandler::new(UpstreamHandlerDeps {
            devices: devices.clone(),
            links,
            default_link,
            sessions: SessionManager::new(keys),
            formatters,
            queue: queue.clone(),
            uplinks: Arc::new(InMemoryUplinkRegistry::default()),
            locations: Arc::new(LocationFetcher::new(
                entities.clone(),
                Arc::new(InMemoryLocationCache::new(Arc::new(SystemClock))),
                LocationFetcherConfig::default(),
            )),
            activation: ActivationPool::new(
                WorkerPoolConfig::default(),
                devices.clone(),
                entities,
                metrics.clone(),
                CancellationToken::new(),
            ),
            last_seen: Arc::new(NoopLastSeen),
            distributors: vec![distributor.clone() as Arc<dyn Distributor>],
            clock: Arc::new(SystemClock),
            metrics: metrics.clone(),
        });
        Self {
            devices,
            network_server,
            distributor,
            queue,
            upstream,
            metrics,
        }
    }

    pub async fn store_device(&self, device: EndDevice) {
        let ids = device.ids.clone();
        self.devices
            .set(
                &ids,
                &[],
                Box::new(move |_| {
                    Box::pin(async move {
                        Ok(Mutation::Write {
                            value: device,
                            paths: vec![
                                "formatters".to_string(),
                                "session".to_string(),
                                "pending_session".to_string(),
                                "skip_payload_crypto_override".to_string(),
                            ],
                        })
                    })
                }),
            )
            .await
            .expect("device stored");
    }

    pub async fn device(&self) -> EndDevice {
        self.devices.get(&ids(), &[]).await.expect("device exists")
    }

    pub async fn subscribe(&self) -> Subscription {
        self.distributor
            .subscribe("test", Some(ids().application_ids))
            .await
            .expect("subscribed")
    }

    pub async fn handle(&self, ids: EndDeviceIdentifiers, up: Up) {
        self.upstream
            .handle_up(ApplicationUp::new(ids, up))
            .await
            .expect("upstream message handled");
    }
}
