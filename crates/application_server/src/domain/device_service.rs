use common::domain::{
    field_mask, DomainError, DomainResult, EndDevice, EndDeviceIdentifiers, Session,
    END_DEVICE_FIELD_PATHS,
};
use common::registry::{DeviceRegistry, Mutation, UplinkRegistry};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{validate_formatters, KeyService};

/// Application Server end device registry operations exposed to clients.
pub struct DeviceService {
    devices: Arc<dyn DeviceRegistry>,
    uplinks: Arc<dyn UplinkRegistry>,
    keys: Arc<KeyService>,
    formatter_max_parameter_length: usize,
}

impl DeviceService {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        uplinks: Arc<dyn UplinkRegistry>,
        keys: Arc<KeyService>,
        formatter_max_parameter_length: usize,
    ) -> Self {
        Self {
            devices,
            uplinks,
            keys,
            formatter_max_parameter_length,
        }
    }

    #[instrument(skip(self, paths), fields(device = %ids.unique_id()))]
    pub async fn get(&self, ids: &EndDeviceIdentifiers, paths: &[String]) -> DomainResult<EndDevice> {
        ids.validate()?;
        field_mask::validate_paths(paths, END_DEVICE_FIELD_PATHS)?;
        self.devices.get(ids, paths).await
    }

    #[instrument(skip(self, device, paths), fields(device = %device.ids.unique_id()))]
    pub async fn set(&self, mut device: EndDevice, paths: &[String]) -> DomainResult<EndDevice> {
        device.ids.validate()?;
        if paths.is_empty() {
            return Err(DomainError::InvalidArgument(
                "field mask must not be empty".to_string(),
            ));
        }
        field_mask::validate_paths(paths, END_DEVICE_FIELD_PATHS)?;
        if field_mask::contains_exact(paths, "ids.dev_addr") {
            return Err(DomainError::InvalidArgument(
                "ids.dev_addr is derived from the session".to_string(),
            ));
        }
        if field_mask::has_path(paths, "formatters") {
            if let Some(formatters) = &device.formatters {
                validate_formatters(formatters, self.formatter_max_parameter_length)?;
            }
        }
        for (name, session) in [
            ("session", device.session.as_mut()),
            ("pending_session", device.pending_session.as_mut()),
        ] {
            if let Some(session) = session {
                if field_mask::has_path(paths, &format!("{}.keys", name)) {
                    self.protect_session(name, session).await?;
                }
            }
        }

        let mut write_paths = paths.to_vec();
        if field_mask::has_path(paths, "session.dev_addr") {
            device.ids.dev_addr = device.session.as_ref().map(|s| s.dev_addr);
            write_paths = field_mask::add_paths(write_paths, &["ids.dev_addr"]);
        }

        let ids = device.ids.key();
        let stored = self
            .devices
            .set(
                &ids,
                &[],
                Box::new(move |stored| {
                    Box::pin(async move {
                        let mut write_paths = write_paths;
                        if stored.is_none() {
                            normalize_euis(&mut device);
                            for (path, eui) in [
                                ("ids.dev_eui", device.ids.dev_eui),
                                ("ids.join_eui", device.ids.join_eui),
                            ] {
                                if eui.is_some() {
                                    write_paths = field_mask::add_paths(write_paths, &[path]);
                                }
                            }
                        }

                        let mut merged = stored.unwrap_or_else(|| EndDevice::new(device.ids.clone()));
                        merged.set_fields(&device, &write_paths);
                        check_distinct_sessions(&merged)?;

                        Ok(Mutation::Write {
                            value: device,
                            paths: write_paths,
                        })
                    })
                }),
            )
            .await?
            .ok_or_else(|| {
                DomainError::Internal(anyhow::anyhow!("end device write returned nothing"))
            })?;

        info!("end device updated");
        Ok(stored.masked(paths))
    }

    #[instrument(skip(self), fields(device = %ids.unique_id()))]
    pub async fn delete(&self, ids: &EndDeviceIdentifiers) -> DomainResult<()> {
        ids.validate()?;
        let unique_id = ids.unique_id();
        self.devices
            .set(
                &ids.key(),
                &[],
                Box::new(move |stored| {
                    Box::pin(async move {
                        match stored {
                            Some(_) => Ok(Mutation::Delete),
                            None => Err(DomainError::NotFound(format!("end device `{}`", unique_id))),
                        }
                    })
                }),
            )
            .await?;
        self.uplinks.clear(ids).await?;
        info!("end device deleted");
        Ok(())
    }

    async fn protect_session(&self, name: &str, session: &mut Session) -> DomainResult<()> {
        if session.keys.session_key_id.is_empty() {
            return Err(DomainError::InvalidArgument(format!(
                "{}.keys.session_key_id is required",
                name
            )));
        }
        if let Some(envelope) = session.keys.app_s_key.take() {
            session.keys.app_s_key = Some(self.keys.protect(envelope).await?);
        }
        if session.started_at.is_none() {
            session.started_at = Some(chrono::Utc::now());
        }
        debug!(slot = %name, session_key_id = %hex::encode(&session.keys.session_key_id), "session keys set");
        Ok(())
    }
}

/// Zero EUIs carry no identity and are not stored.
fn normalize_euis(device: &mut EndDevice) {
    if device.ids.dev_eui.is_some_and(|eui| eui.is_zero()) {
        device.ids.dev_eui = None;
    }
    if device.ids.join_eui.is_some_and(|eui| eui.is_zero()) {
        device.ids.join_eui = None;
    }
}

fn check_distinct_sessions(device: &EndDevice) -> DomainResult<()> {
    if let (Some(current), Some(pending)) = (&device.session, &device.pending_session) {
        if current.session_key_id() == pending.session_key_id() {
            return Err(DomainError::InvalidArgument(
                "session and pending_session must differ".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KeyServiceConfig, DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH};
    use common::crypto::MemKeyVault;
    use common::domain::{
        AesKey, ApplicationUplink, DevAddr, Eui64, KeyEnvelope, MessagePayloadFormatters,
    };
    use common::registry::{InMemoryDeviceRegistry, InMemoryUplinkRegistry, MockUplinkRegistry};
    use std::collections::HashMap;

    fn ids() -> EndDeviceIdentifiers {
        EndDeviceIdentifiers::new("foo-app", "foo-device")
    }

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    fn keys(kek_label: &str) -> Arc<KeyService> {
        let mut keks = HashMap::new();
        keks.insert("as-kek".to_string(), AesKey([0x0f; 16]));
        Arc::new(KeyService::new(
            Arc::new(MemKeyVault::new(keks)),
            None,
            None,
            KeyServiceConfig {
                kek_label: kek_label.to_string(),
                ..Default::default()
            },
        ))
    }

    fn service(devices: Arc<InMemoryDeviceRegistry>, uplinks: Arc<dyn UplinkRegistry>) -> DeviceService {
        DeviceService::new(devices, uplinks, keys(""), DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH)
    }

    fn session(session_key_id: u8) -> Session {
        Session::new(
            DevAddr([session_key_id; 4]),
            vec![session_key_id],
            KeyEnvelope::plain(AesKey([session_key_id; 16])),
        )
    }

    #[tokio::test]
    async fn test_get_missing_device_is_not_found() {
        let service = service(
            Arc::new(InMemoryDeviceRegistry::default()),
            Arc::new(InMemoryUplinkRegistry::default()),
        );

        let err = service.get(&ids(), &[]).await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_session_sets_dev_addr() {
        // Arrange
        let devices = Arc::new(InMemoryDeviceRegistry::default());
        let service = service(devices.clone(), Arc::new(InMemoryUplinkRegistry::default()));
        let mut device = EndDevice::new(ids());
        device.session = Some(session(0x11));

        // Act
        let stored = service.set(device, &paths(&["session"])).await.unwrap();

        // Assert
        assert_eq!(stored.ids.dev_addr, Some(DevAddr([0x11; 4])));
        let read = service.get(&ids(), &paths(&["session"])).await.unwrap();
        assert_eq!(read.session.unwrap().session_key_id(), &[0x11]);
    }

    #[tokio::test]
    async fn test_set_wraps_cleartext_session_key() {
        let devices = Arc::new(InMemoryDeviceRegistry::default());
        let service = DeviceService::new(
            devices.clone(),
            Arc::new(InMemoryUplinkRegistry::default()),
            keys("as-kek"),
            DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH,
        );
        let mut device = EndDevice::new(ids());
        device.session = Some(session(0x11));

        service.set(device, &paths(&["session"])).await.unwrap();

        let stored = devices.get(&ids(), &[]).await.unwrap();
        let envelope = stored.session.unwrap().keys.app_s_key.unwrap();
        assert!(envelope.is_wrapped());
        assert_eq!(envelope.kek_label, "as-kek");
    }

    #[tokio::test]
    async fn test_set_session_requires_session_key_id() {
        let service = service(
            Arc::new(InMemoryDeviceRegistry::default()),
            Arc::new(InMemoryUplinkRegistry::default()),
        );
        let mut device = EndDevice::new(ids());
        let mut without_id = session(0x11);
        without_id.keys.session_key_id.clear();
        device.session = Some(without_id);

        let result = service.set(device, &paths(&["session"])).await;

        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_set_rejects_pending_equal_to_current() {
        let devices = Arc::new(InMemoryDeviceRegistry::default());
        let service = service(devices.clone(), Arc::new(InMemoryUplinkRegistry::default()));
        let mut device = EndDevice::new(ids());
        device.session = Some(session(0x11));
        service.set(device, &paths(&["session"])).await.unwrap();

        let mut update = EndDevice::new(ids());
        update.pending_session = Some(session(0x11));
        let result = service.set(update, &paths(&["pending_session"])).await;

        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
        assert!(devices.get(&ids(), &[]).await.unwrap().pending_session.is_none());
    }

    #[tokio::test]
    async fn test_set_rejects_dev_addr_path() {
        let service = service(
            Arc::new(InMemoryDeviceRegistry::default()),
            Arc::new(InMemoryUplinkRegistry::default()),
        );

        let result = service
            .set(EndDevice::new(ids()), &paths(&["ids.dev_addr"]))
            .await;

        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_set_rejects_long_formatter_parameter() {
        let service = DeviceService::new(
            Arc::new(InMemoryDeviceRegistry::default()),
            Arc::new(InMemoryUplinkRegistry::default()),
            keys(""),
            8,
        );
        let mut device = EndDevice::new(ids());
        device.formatters = Some(MessagePayloadFormatters {
            down_formatter_parameter: "bytes.map(b, b * 2)".to_string(),
            ..Default::default()
        });

        let result = service.set(device, &paths(&["formatters"])).await;

        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_create_drops_zero_euis_and_keeps_dev_eui_immutable() {
        let devices = Arc::new(InMemoryDeviceRegistry::default());
        let service = service(devices.clone(), Arc::new(InMemoryUplinkRegistry::default()));
        let mut device = EndDevice::new(ids());
        device.ids.dev_eui = Some(Eui64([0x42; 8]));
        device.ids.join_eui = Some(Eui64([0; 8]));

        let stored = service
            .set(device, &paths(&["skip_payload_crypto_override"]))
            .await
            .unwrap();
        assert_eq!(stored.ids.dev_eui, Some(Eui64([0x42; 8])));
        assert_eq!(stored.ids.join_eui, None);

        let mut update = EndDevice::new(ids());
        update.ids.dev_eui = Some(Eui64([0x43; 8]));
        let result = service.set(update, &paths(&["ids.dev_eui"])).await;
        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_duplicate_dev_eui_already_exists() {
        let service = service(
            Arc::new(InMemoryDeviceRegistry::default()),
            Arc::new(InMemoryUplinkRegistry::default()),
        );
        let mut first = EndDevice::new(ids());
        first.ids.dev_eui = Some(Eui64([0x42; 8]));
        service.set(first, &paths(&["formatters"])).await.unwrap();

        let mut second = EndDevice::new(EndDeviceIdentifiers::new("foo-app", "bar-device"));
        second.ids.dev_eui = Some(Eui64([0x42; 8]));
        let result = service.set(second, &paths(&["formatters"])).await;

        assert!(matches!(result, Err(DomainError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_delete_clears_uplink_buffer() {
        let devices = Arc::new(InMemoryDeviceRegistry::default());
        let uplinks = Arc::new(InMemoryUplinkRegistry::default());
        let service = service(devices.clone(), uplinks.clone());
        service
            .set(EndDevice::new(ids()), &paths(&["formatters"]))
            .await
            .unwrap();
        uplinks.push(&ids(), ApplicationUplink::default()).await.unwrap();

        service.delete(&ids()).await.unwrap();

        assert!(devices.get(&ids(), &[]).await.unwrap_err().is_not_found());
        assert!(uplinks.range(&ids()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_device_keeps_buffer_untouched() {
        let mut uplinks = MockUplinkRegistry::new();
        uplinks.expect_clear().times(0);
        let service = service(Arc::new(InMemoryDeviceRegistry::default()), Arc::new(uplinks));

        let err = service.delete(&ids()).await.unwrap_err();

        assert!(err.is_not_found());
    }
}
