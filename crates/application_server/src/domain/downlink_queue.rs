use common::crypto::{decrypt_downlink, encrypt_downlink};
use common::domain::{
    ApplicationDownlink, ApplicationLink, DomainError, DomainResult,
    DownlinkQueueOperationErrorDetails, EndDevice, EndDeviceIdentifiers, MessagePayloadFormatters,
    Session, SessionErrorDetails,
};
use common::metrics::{DropCause, SharedMetrics};
use common::registry::{get_link_or_default, DeviceRegistry, LinkRegistry, Mutation};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{KeyService, NetworkServer, PayloadFormatterService, SESSION_PATHS};

/// Upper bound of rebuild-and-retry rounds for one queue operation.
pub const MAX_QUEUE_ATTEMPTS: usize = 50;

pub const MAX_F_PORT: u32 = 223;

/// Device fields read by queue operations.
pub const DOWNLINK_DEVICE_PATHS: &[&str] = &[
    "ids",
    "formatters",
    "version_ids",
    "session",
    "pending_session",
    "skip_payload_crypto_override",
];

pub(crate) fn paths(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

/// Formatters in effect for a device: its own, else the link defaults.
pub fn effective_formatters(device: &EndDevice, link: &ApplicationLink) -> MessagePayloadFormatters {
    device
        .formatters
        .clone()
        .or_else(|| link.default_formatters.clone())
        .unwrap_or_default()
}

/// Rejects downlinks integrations are not allowed to schedule.
pub fn validate_downlinks(downlinks: &[ApplicationDownlink]) -> DomainResult<()> {
    for downlink in downlinks {
        if downlink.f_port == 0 || downlink.f_port > MAX_F_PORT {
            return Err(DomainError::InvalidArgument(format!(
                "f_port {} out of range 1..={}",
                downlink.f_port, MAX_F_PORT
            )));
        }
        if downlink.frm_payload.is_empty() == downlink.decoded_payload.is_none() {
            return Err(DomainError::InvalidArgument(
                "exactly one of frm_payload or decoded_payload must be set".to_string(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueOperation {
    Push,
    Replace,
}

impl QueueOperation {
    fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Push => "push",
            QueueOperation::Replace => "replace",
        }
    }
}

/// Encrypts downlinks under the device sessions and schedules them on the
/// Network Server, keeping the session frame counters in sync with it.
#[derive(Clone)]
pub struct DownlinkQueueService {
    devices: Arc<dyn DeviceRegistry>,
    links: Arc<dyn LinkRegistry>,
    default_link: ApplicationLink,
    network_server: Arc<dyn NetworkServer>,
    keys: Arc<KeyService>,
    formatters: Arc<PayloadFormatterService>,
    metrics: SharedMetrics,
}

impl DownlinkQueueService {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        links: Arc<dyn LinkRegistry>,
        default_link: ApplicationLink,
        network_server: Arc<dyn NetworkServer>,
        keys: Arc<KeyService>,
        formatters: Arc<PayloadFormatterService>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            devices,
            links,
            default_link,
            network_server,
            keys,
            formatters,
            metrics,
        }
    }

    #[instrument(skip(self, downlinks), fields(device = %ids.unique_id(), count = downlinks.len()))]
    pub async fn push(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()> {
        validate_downlinks(&downlinks)?;
        self.run(ids, QueueOperation::Push, downlinks, Vec::new()).await
    }

    #[instrument(skip(self, downlinks), fields(device = %ids.unique_id(), count = downlinks.len()))]
    pub async fn replace(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()> {
        validate_downlinks(&downlinks)?;
        self.run(ids, QueueOperation::Replace, downlinks, Vec::new())
            .await
    }

    /// Empties the Network Server queue of the device.
    #[instrument(skip(self), fields(device = %ids.unique_id()))]
    pub async fn clear(&self, ids: &EndDeviceIdentifiers) -> DomainResult<()> {
        self.run(ids, QueueOperation::Replace, Vec::new(), Vec::new())
            .await
    }

    /// Pushes downlinks recovered from the Network Server. Sessions listed in
    /// `skip_session_key_ids` are left out.
    pub(crate) async fn requeue(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
        skip_session_key_ids: Vec<Vec<u8>>,
    ) -> DomainResult<()> {
        self.run(ids, QueueOperation::Push, downlinks, skip_session_key_ids)
            .await
    }

    /// Puts a nacked downlink back in front of the current queue.
    pub(crate) async fn requeue_nack(
        &self,
        ids: &EndDeviceIdentifiers,
        nack: ApplicationDownlink,
    ) -> DomainResult<()> {
        let queued = self.list(ids).await?;
        let downlinks = std::iter::once(nack)
            .chain(queued)
            .map(|mut downlink| {
                if !downlink.frm_payload.is_empty() {
                    downlink.decoded_payload = None;
                }
                downlink
            })
            .collect();
        self.run(ids, QueueOperation::Replace, downlinks, Vec::new())
            .await
    }

    /// Items queued for the session in use, decrypted and decoded unless
    /// payload crypto is skipped.
    #[instrument(skip(self), fields(device = %ids.unique_id()))]
    pub async fn list(&self, ids: &EndDeviceIdentifiers) -> DomainResult<Vec<ApplicationDownlink>> {
        let device = self
            .devices
            .get(ids, &paths(DOWNLINK_DEVICE_PATHS))
            .await?;
        let Some(session) = device.session.as_ref().or(device.pending_session.as_ref()) else {
            return Ok(Vec::new());
        };
        let link = get_link_or_default(self.links.as_ref(), &ids.application_ids, &self.default_link)
            .await?;

        let mut downlinks: Vec<ApplicationDownlink> = self
            .network_server
            .downlink_queue_list(&device.ids)
            .await?
            .into_iter()
            .filter(|d| d.session_key_id == session.session_key_id())
            .collect();

        if self
            .keys
            .skips_payload_crypto(device.skip_payload_crypto_override, &link, Some(session))
            .await?
        {
            return Ok(downlinks);
        }
        let key = self
            .keys
            .session_key(session)
            .await?
            .ok_or_else(|| DomainError::FailedPrecondition("app_s_key_not_unwrapped".to_string()))?;
        let formatters = effective_formatters(&device, &link);
        for downlink in &mut downlinks {
            downlink.frm_payload =
                decrypt_downlink(&key, session.dev_addr, downlink.f_cnt, &downlink.frm_payload);
            if let Err(e) = self
                .formatters
                .decode_downlink(&formatters, device.version_ids.as_ref(), downlink)
                .await
            {
                warn!(error = %e, f_cnt = downlink.f_cnt, "failed to decode queued downlink");
                self.metrics.record_drop(DropCause::DecodeFail, &e.name());
            }
        }
        Ok(downlinks)
    }

    async fn run(
        &self,
        ids: &EndDeviceIdentifiers,
        operation: QueueOperation,
        mut downlinks: Vec<ApplicationDownlink>,
        skip_session_key_ids: Vec<Vec<u8>>,
    ) -> DomainResult<()> {
        for downlink in &mut downlinks {
            downlink
                .correlation_ids
                .push(format!("as:downlink:{}", Uuid::new_v4()));
        }
        let link = get_link_or_default(self.links.as_ref(), &ids.application_ids, &self.default_link)
            .await?;
        let count = downlinks.len() as u64;

        let this = self.clone();
        self.devices
            .set(
                ids,
                &paths(DOWNLINK_DEVICE_PATHS),
                Box::new(move |stored| {
                    Box::pin(async move {
                        let Some(mut device) = stored else {
                            return Err(DomainError::NotFound("end device".to_string()));
                        };
                        match this
                            .apply(&mut device, &link, operation, downlinks, &skip_session_key_ids)
                            .await?
                        {
                            Some(paths) => Ok(Mutation::Write {
                                value: device,
                                paths,
                            }),
                            None => Ok(Mutation::Keep),
                        }
                    })
                }),
            )
            .await?;

        if operation == QueueOperation::Push {
            self.metrics.add_downlinks_pushed(count);
        }
        Ok(())
    }

    /// Runs the operation against the Network Server. Returns the paths to
    /// write back, `None` when the device is unchanged.
    async fn apply(
        &self,
        device: &mut EndDevice,
        link: &ApplicationLink,
        operation: QueueOperation,
        mut downlinks: Vec<ApplicationDownlink>,
        skip_session_key_ids: &[Vec<u8>],
    ) -> DomainResult<Option<Vec<String>>> {
        let formatters = effective_formatters(device, link);
        for downlink in &mut downlinks {
            if let Err(e) = self
                .formatters
                .encode_downlink(&formatters, device.version_ids.as_ref(), downlink)
                .await
            {
                self.metrics.record_drop(DropCause::EncodeFail, &e.name());
                return Err(e);
            }
        }

        if downlinks.is_empty() {
            self.call(operation, &device.ids, Vec::new()).await?;
            return Ok(None);
        }

        let selected = device.session.as_ref().or(device.pending_session.as_ref());
        if self
            .keys
            .skips_payload_crypto(device.skip_payload_crypto_override, link, selected)
            .await?
        {
            debug!("payload crypto skipped, scheduling downlinks verbatim");
            self.call(operation, &device.ids, downlinks).await?;
            return Ok(None);
        }

        for attempt in 1..=MAX_QUEUE_ATTEMPTS {
            let encrypted = self
                .encrypt_for_sessions(device, &downlinks, skip_session_key_ids)
                .await?;
            match self.call(operation, &device.ids, encrypted).await {
                Ok(()) => return Ok(Some(paths(SESSION_PATHS))),
                Err(DomainError::DownlinkQueueOperation { message, details }) => {
                    debug!(attempt, error = %message, "network server rejected queue, rebuilding sessions");
                    self.rebuild_sessions(device, &details).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(DomainError::Aborted("rebuild".to_string()))
    }

    async fn call(
        &self,
        operation: QueueOperation,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()> {
        debug!(operation = operation.as_str(), count = downlinks.len(), "calling network server");
        match operation {
            QueueOperation::Push => self.network_server.downlink_queue_push(ids, downlinks).await,
            QueueOperation::Replace => {
                self.network_server
                    .downlink_queue_replace(ids, downlinks)
                    .await
            }
        }
    }

    /// One copy of every downlink per session, with consecutive frame
    /// counters taken from the session.
    async fn encrypt_for_sessions(
        &self,
        device: &mut EndDevice,
        downlinks: &[ApplicationDownlink],
        skip_session_key_ids: &[Vec<u8>],
    ) -> DomainResult<Vec<ApplicationDownlink>> {
        let mut encrypted = Vec::with_capacity(downlinks.len() * 2);
        let mut used = 0;
        for session in [device.session.as_mut(), device.pending_session.as_mut()]
            .into_iter()
            .flatten()
        {
            if skip_session_key_ids
                .iter()
                .any(|id| id.as_slice() == session.session_key_id())
            {
                continue;
            }
            used += 1;
            let key = self.keys.session_key(session).await?.ok_or_else(|| {
                DomainError::FailedPrecondition("app_s_key_not_unwrapped".to_string())
            })?;
            for downlink in downlinks {
                let f_cnt = session.last_a_f_cnt_down.checked_add(1).ok_or_else(|| {
                    DomainError::FailedPrecondition("f_cnt_down_exhausted".to_string())
                })?;
                session.last_a_f_cnt_down = f_cnt;
                let mut item = downlink.clone();
                item.session_key_id = session.session_key_id().to_vec();
                item.f_cnt = f_cnt;
                item.frm_payload =
                    encrypt_downlink(&key, session.dev_addr, f_cnt, &downlink.frm_payload);
                encrypted.push(item);
            }
        }
        if used == 0 {
            return Err(DomainError::FailedPrecondition(
                "no_device_session".to_string(),
            ));
        }
        Ok(encrypted)
    }

    async fn rebuild_sessions(
        &self,
        device: &mut EndDevice,
        details: &DownlinkQueueOperationErrorDetails,
    ) -> DomainResult<()> {
        let current = self
            .rebuild_session(&device.ids, device.session.take(), details.current.as_ref())
            .await?;
        let pending = self
            .rebuild_session(
                &device.ids,
                device.pending_session.take(),
                details.pending.as_ref(),
            )
            .await?;
        if let Some(current) = &current {
            device.ids.dev_addr = Some(current.dev_addr);
        }
        device.session = current;
        device.pending_session = pending;
        Ok(())
    }

    async fn rebuild_session(
        &self,
        ids: &EndDeviceIdentifiers,
        local: Option<Session>,
        remote: Option<&SessionErrorDetails>,
    ) -> DomainResult<Option<Session>> {
        let Some(remote) = remote else {
            return Ok(None);
        };
        let last_a_f_cnt_down = remote.min_f_cnt_down.saturating_sub(1);

        if let Some(mut local) = local {
            let same_addr = remote.dev_addr.map_or(true, |addr| addr == local.dev_addr);
            if local.session_key_id() == remote.session_key_id.as_slice() && same_addr {
                local.last_a_f_cnt_down = last_a_f_cnt_down;
                return Ok(Some(local));
            }
        }
        if remote.session_key_id.is_empty() {
            return Err(DomainError::Aborted("rebuild".to_string()));
        }

        let envelope = self
            .keys
            .fetch_app_s_key(ids, &remote.session_key_id)
            .await?;
        let mut session = Session::new(
            remote.dev_addr.unwrap_or_default(),
            remote.session_key_id.clone(),
            envelope,
        );
        session.last_a_f_cnt_down = last_a_f_cnt_down;
        Ok(Some(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        InMemoryFormatterRepository, KeyServiceConfig, MockJoinServer, MockNetworkServer,
    };
    use common::crypto::MemKeyVault;
    use common::domain::{AesKey, DevAddr, KeyEnvelope, PayloadFormatter};
    use common::metrics::AsMetrics;
    use common::registry::{InMemoryDeviceRegistry, InMemoryLinkRegistry};
    use payload::ScriptRunner;
    use serde_json::json;
    use std::sync::Mutex;

    const KEY: AesKey = AesKey([0x33; 16]);
    const ADDR: DevAddr = DevAddr([0x33, 0x33, 0x33, 0x33]);

    fn ids() -> EndDeviceIdentifiers {
        EndDeviceIdentifiers::new("foo-app", "foo-device")
    }

    async fn registry_with(device: EndDevice) -> Arc<InMemoryDeviceRegistry> {
        let registry = Arc::new(InMemoryDeviceRegistry::default());
        registry
            .set(
                &device.ids.clone(),
                &[],
                Box::new(move |_| {
                    Box::pin(async move {
                        Ok(Mutation::Write {
                            value: device,
                            paths: paths(&[
                                "formatters",
                                "session",
                                "pending_session",
                                "skip_payload_crypto_override",
                            ]),
                        })
                    })
                }),
            )
            .await
            .unwrap();
        registry
    }

    fn device(last_a_f_cnt_down: u32) -> EndDevice {
        let mut device = EndDevice::new(ids());
        let mut session = Session::new(ADDR, vec![0x33], KeyEnvelope::plain(KEY));
        session.last_a_f_cnt_down = last_a_f_cnt_down;
        device.session = Some(session);
        device
    }

    fn service(
        devices: Arc<InMemoryDeviceRegistry>,
        network_server: MockNetworkServer,
        join_server: Option<MockJoinServer>,
    ) -> DownlinkQueueService {
        let keys = KeyService::new(
            Arc::new(MemKeyVault::default()),
            join_server.map(|js| Arc::new(js) as Arc<dyn crate::domain::JoinServer>),
            None,
            KeyServiceConfig::default(),
        );
        let formatters = PayloadFormatterService::new(
            ScriptRunner::default(),
            Arc::new(InMemoryFormatterRepository::default()),
        );
        DownlinkQueueService::new(
            devices,
            Arc::new(InMemoryLinkRegistry::default()),
            ApplicationLink::default(),
            Arc::new(network_server),
            Arc::new(keys),
            Arc::new(formatters),
            AsMetrics::shared(),
        )
    }

    fn downlink(f_port: u32, payload: &[u8]) -> ApplicationDownlink {
        ApplicationDownlink {
            f_port,
            frm_payload: payload.to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_push_encrypts_with_consecutive_f_cnt() {
        // Arrange
        let devices = registry_with(device(4)).await;
        let pushed = Arc::new(Mutex::new(Vec::new()));
        let sink = pushed.clone();
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_push()
            .times(1)
            .returning(move |_, downlinks| {
                sink.lock().unwrap().extend(downlinks);
                Ok(())
            });
        let service = service(devices.clone(), network_server, None);

        // Act
        service
            .push(&ids(), vec![downlink(1, &[0x01]), downlink(2, &[0x02])])
            .await
            .unwrap();

        // Assert
        let pushed = pushed.lock().unwrap().clone();
        assert_eq!(pushed.iter().map(|d| d.f_cnt).collect::<Vec<_>>(), vec![5, 6]);
        assert_eq!(pushed[0].session_key_id, vec![0x33]);
        assert_eq!(decrypt_downlink(&KEY, ADDR, 5, &pushed[0].frm_payload), vec![0x01]);
        assert!(pushed[0].correlation_ids[0].starts_with("as:downlink:"));
        let stored = devices.get(&ids(), &[]).await.unwrap();
        assert_eq!(stored.session.unwrap().last_a_f_cnt_down, 6);
    }

    #[tokio::test]
    async fn test_push_rebuilds_counter_from_error_details() {
        let devices = registry_with(device(0)).await;
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = attempts.clone();
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_push()
            .times(2)
            .returning(move |_, downlinks| {
                let mut seen = seen.lock().unwrap();
                seen.push(downlinks[0].f_cnt);
                if seen.len() == 1 {
                    return Err(DomainError::DownlinkQueueOperation {
                        message: "f_cnt too low".to_string(),
                        details: DownlinkQueueOperationErrorDetails {
                            current: Some(SessionErrorDetails {
                                session_key_id: vec![0x33],
                                dev_addr: Some(ADDR),
                                min_f_cnt_down: 10,
                            }),
                            pending: None,
                        },
                    });
                }
                Ok(())
            });
        let service = service(devices.clone(), network_server, None);

        service.push(&ids(), vec![downlink(1, &[0x01])]).await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), vec![1, 10]);
        let stored = devices.get(&ids(), &[]).await.unwrap();
        assert_eq!(stored.session.unwrap().last_a_f_cnt_down, 10);
    }

    #[tokio::test]
    async fn test_rebuild_installs_session_reported_by_network_server() {
        let devices = registry_with(device(0)).await;
        let mut join_server = MockJoinServer::new();
        join_server
            .expect_get_app_s_key()
            .times(1)
            .returning(|_| Ok(KeyEnvelope::plain(AesKey([0x44; 16]))));
        let mut calls = 0;
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_push()
            .times(2)
            .returning(move |_, downlinks| {
                calls += 1;
                if calls == 1 {
                    return Err(DomainError::DownlinkQueueOperation {
                        message: "unknown session".to_string(),
                        details: DownlinkQueueOperationErrorDetails {
                            current: Some(SessionErrorDetails {
                                session_key_id: vec![0x44],
                                dev_addr: Some(DevAddr([0x44; 4])),
                                min_f_cnt_down: 0,
                            }),
                            pending: None,
                        },
                    });
                }
                assert_eq!(downlinks[0].session_key_id, vec![0x44]);
                assert_eq!(downlinks[0].f_cnt, 1);
                Ok(())
            });
        let service = service(devices.clone(), network_server, Some(join_server));

        service.push(&ids(), vec![downlink(1, &[0x01])]).await.unwrap();

        let stored = devices.get(&ids(), &[]).await.unwrap();
        let session = stored.session.unwrap();
        assert_eq!(session.session_key_id(), &[0x44]);
        assert_eq!(stored.ids.dev_addr, Some(DevAddr([0x44; 4])));
    }

    #[tokio::test]
    async fn test_rebuild_without_session_key_id_aborts() {
        let devices = registry_with(device(0)).await;
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_push()
            .times(1)
            .returning(|_, _| {
                Err(DomainError::DownlinkQueueOperation {
                    message: "no session".to_string(),
                    details: DownlinkQueueOperationErrorDetails {
                        current: Some(SessionErrorDetails::default()),
                        pending: None,
                    },
                })
            });
        let service = service(devices, network_server, None);

        let err = service
            .push(&ids(), vec![downlink(1, &[0x01])])
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Aborted(ref m) if m == "rebuild"));
    }

    #[tokio::test]
    async fn test_push_gives_up_after_max_attempts() {
        let devices = registry_with(device(0)).await;
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_push()
            .times(MAX_QUEUE_ATTEMPTS)
            .returning(|_, _| {
                Err(DomainError::DownlinkQueueOperation {
                    message: "conflict".to_string(),
                    details: DownlinkQueueOperationErrorDetails {
                        current: Some(SessionErrorDetails {
                            session_key_id: vec![0x33],
                            dev_addr: Some(ADDR),
                            min_f_cnt_down: 1,
                        }),
                        pending: None,
                    },
                })
            });
        let service = service(devices, network_server, None);

        let err = service
            .push(&ids(), vec![downlink(1, &[0x01])])
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_push_without_session() {
        let devices = registry_with(EndDevice::new(ids())).await;
        let mut network_server = MockNetworkServer::new();
        network_server.expect_downlink_queue_push().times(0);
        let service = service(devices, network_server, None);

        let err = service
            .push(&ids(), vec![downlink(1, &[0x01])])
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::FailedPrecondition(ref m) if m == "no_device_session"));
    }

    #[tokio::test]
    async fn test_skip_crypto_pushes_verbatim_without_retry() {
        let mut dev = device(0);
        dev.session = Some(Session::new(
            ADDR,
            vec![0x33],
            KeyEnvelope::wrapped("foreign-kek", vec![0x01; 24]),
        ));
        dev.skip_payload_crypto_override = Some(true);
        let devices = registry_with(dev).await;
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_push()
            .withf(|_, downlinks| downlinks[0].frm_payload == vec![0xaa] && downlinks[0].f_cnt == 7)
            .times(1)
            .returning(|_, _| {
                Err(DomainError::DownlinkQueueOperation {
                    message: "f_cnt too low".to_string(),
                    details: DownlinkQueueOperationErrorDetails::default(),
                })
            });
        let service = service(devices, network_server, None);
        let mut item = downlink(1, &[0xaa]);
        item.f_cnt = 7;

        let err = service.push(&ids(), vec![item]).await.unwrap_err();

        assert!(matches!(err, DomainError::DownlinkQueueOperation { .. }));
    }

    #[tokio::test]
    async fn test_clear_replaces_with_empty_queue() {
        let devices = registry_with(EndDevice::new(ids())).await;
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_replace()
            .withf(|_, downlinks| downlinks.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));
        let service = service(devices, network_server, None);

        service.clear(&ids()).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_filters_and_decrypts_current_session() {
        let mut dev = device(2);
        dev.formatters = Some(MessagePayloadFormatters {
            down_formatter: PayloadFormatter::CayenneLpp,
            ..Default::default()
        });
        let devices = registry_with(dev).await;
        let mut network_server = MockNetworkServer::new();
        network_server
            .expect_downlink_queue_list()
            .times(1)
            .returning(|_| {
                Ok(vec![
                    ApplicationDownlink {
                        session_key_id: vec![0x33],
                        f_port: 1,
                        f_cnt: 2,
                        frm_payload: encrypt_downlink(&KEY, ADDR, 2, &[0x01, 0x01, 0x05]),
                        ..Default::default()
                    },
                    ApplicationDownlink {
                        session_key_id: vec![0x44],
                        f_port: 1,
                        f_cnt: 9,
                        frm_payload: vec![0xff],
                        ..Default::default()
                    },
                ])
            });
        let service = service(devices, network_server, None);

        let listed = service.list(&ids()).await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].frm_payload, vec![0x01, 0x01, 0x05]);
        assert_eq!(
            listed[0].decoded_payload.as_ref().unwrap().get("digital_output_1"),
            Some(&json!(5))
        );
    }

    #[test]
    fn test_validate_downlinks() {
        assert!(validate_downlinks(&[downlink(1, &[0x01])]).is_ok());
        assert!(validate_downlinks(&[downlink(0, &[0x01])]).is_err());
        assert!(validate_downlinks(&[downlink(224, &[0x01])]).is_err());
        assert!(validate_downlinks(&[downlink(1, &[])]).is_err());

        let mut both = downlink(1, &[0x01]);
        both.decoded_payload = Some(serde_json::Map::new());
        assert!(validate_downlinks(&[both]).is_err());

        let decoded = ApplicationDownlink {
            f_port: 2,
            decoded_payload: Some(serde_json::Map::new()),
            ..Default::default()
        };
        assert!(validate_downlinks(&[decoded]).is_ok());
    }
}
