use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::crypto::{decrypt_downlink, decrypt_uplink};
use common::domain::{
    ApplicationDownlink, ApplicationInvalidatedDownlinks, ApplicationJoinAccept, ApplicationLink,
    ApplicationLocation, ApplicationUp, ApplicationUplink, ApplicationUplinkNormalized,
    DomainError, DomainResult, EndDevice, EndDeviceIdentifiers, Location, LocationSource,
    Session, Struct, Up,
};
use common::metrics::{DropCause, SharedMetrics};
use common::registry::{
    get_link_or_default, set_device_with, DeviceRegistry, LinkRegistry, Mutation, UplinkRegistry,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    effective_formatters, find_session, paths, ActivationPool, Distributor, DownlinkQueueService,
    KeyService, LastSeenProvider, LocationFetcher, PayloadFormatterService, SessionManager,
    DOWNLINK_DEVICE_PATHS,
};

/// Location service name of positions decoded from the application payload.
pub const FRM_PAYLOAD_LOCATION_SERVICE: &str = "frm-payload";

const UPLINK_DEVICE_PATHS: &[&str] = &[
    "ids",
    "version_ids",
    "formatters",
    "session",
    "pending_session",
    "skip_payload_crypto_override",
    "activated_at",
];

/// Collaborators of the upstream handler.
pub struct UpstreamHandlerDeps {
    pub devices: Arc<dyn DeviceRegistry>,
    pub links: Arc<dyn LinkRegistry>,
    pub default_link: ApplicationLink,
    pub sessions: SessionManager,
    pub formatters: Arc<PayloadFormatterService>,
    pub queue: DownlinkQueueService,
    pub uplinks: Arc<dyn UplinkRegistry>,
    pub locations: Arc<LocationFetcher>,
    pub activation: ActivationPool,
    pub last_seen: Arc<dyn LastSeenProvider>,
    pub distributors: Vec<Arc<dyn Distributor>>,
    pub clock: Arc<dyn Clock>,
    pub metrics: SharedMetrics,
}

/// Processes the traffic the Network Server forwards for a device and
/// publishes the results to the distributors.
#[derive(Clone)]
pub struct UpstreamHandler {
    deps: Arc<UpstreamHandlerDeps>,
}

impl UpstreamHandler {
    pub fn new(deps: UpstreamHandlerDeps) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    fn keys(&self) -> &Arc<KeyService> {
        self.deps.sessions.keys()
    }

    /// Handles one message, logging failures instead of returning them so a
    /// bad message never stalls the device.
    pub async fn handle(&self, up: ApplicationUp) {
        let device = up.end_device_ids.unique_id();
        let kind = up.up.name();
        if let Err(e) = self.handle_up(up).await {
            warn!(device = %device, kind = kind, error = %e, "failed to handle upstream message");
            self.deps
                .metrics
                .record_drop(DropCause::UpstreamHandlerFailed, &e.name());
        }
    }

    #[instrument(skip_all, fields(device = %up.end_device_ids.unique_id(), kind = up.up.name()))]
    pub async fn handle_up(&self, up: ApplicationUp) -> DomainResult<()> {
        let ApplicationUp {
            end_device_ids: ids,
            mut correlation_ids,
            up,
            ..
        } = up;
        correlation_ids.push(format!("as:up:{}", Uuid::new_v4()));
        let received_at = self.deps.clock.now();
        let link = get_link_or_default(
            self.deps.links.as_ref(),
            &ids.application_ids,
            &self.deps.default_link,
        )
        .await?;

        let published = match up {
            Up::UplinkMessage(uplink) => self.handle_uplink(&ids, &link, uplink, received_at).await?,
            Up::JoinAccept(join_accept) => {
                vec![Up::JoinAccept(
                    self.handle_join_accept(&ids, &link, join_accept).await?,
                )]
            }
            Up::DownlinkQueueInvalidated(invalidated) => self
                .handle_invalidated(&ids, &link, invalidated)
                .await?
                .map(Up::DownlinkQueueInvalidated)
                .into_iter()
                .collect(),
            Up::DownlinkNack(mut nack) => {
                self.handle_nack(&ids, &link, &mut nack).await?;
                vec![Up::DownlinkNack(nack)]
            }
            Up::DownlinkAck(mut downlink) => {
                self.decrypt_event(&ids, &link, &mut downlink).await?;
                vec![Up::DownlinkAck(downlink)]
            }
            Up::DownlinkSent(mut downlink) => {
                self.decrypt_event(&ids, &link, &mut downlink).await?;
                vec![Up::DownlinkSent(downlink)]
            }
            Up::DownlinkQueued(mut downlink) => {
                self.decrypt_event(&ids, &link, &mut downlink).await?;
                vec![Up::DownlinkQueued(downlink)]
            }
            Up::DownlinkFailed(mut failed) => {
                self.decrypt_event(&ids, &link, &mut failed.downlink).await?;
                vec![Up::DownlinkFailed(failed)]
            }
            Up::LocationSolved(location) => {
                self.store_location(&ids, &location).await?;
                vec![Up::LocationSolved(location)]
            }
            other @ (Up::ServiceData(_) | Up::UplinkNormalized(_)) => vec![other],
        };

        for up in published {
            let message = ApplicationUp {
                end_device_ids: ids.clone(),
                correlation_ids: correlation_ids.clone(),
                received_at: Some(received_at),
                up,
            };
            self.publish(&message).await;
        }
        Ok(())
    }

    async fn publish(&self, up: &ApplicationUp) {
        for distributor in &self.deps.distributors {
            if let Err(e) = distributor.publish(up).await {
                warn!(error = %e, kind = up.up.name(), "failed to publish upstream message");
            }
        }
    }

    async fn handle_uplink(
        &self,
        ids: &EndDeviceIdentifiers,
        link: &ApplicationLink,
        uplink: ApplicationUplink,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Vec<Up>> {
        self.deps.metrics.inc_uplinks_received();

        let this = self.clone();
        let key = ids.clone();
        let link = link.clone();
        let (_, (device, mut uplink, pass)) = set_device_with(
            self.deps.devices.as_ref(),
            ids,
            &paths(UPLINK_DEVICE_PATHS),
            move |stored| async move {
                let mut device = stored.unwrap_or_else(|| EndDevice::new(key.clone()));
                let mut uplink = uplink;
                let changed = this
                    .deps
                    .sessions
                    .match_session(&mut device, &uplink.session_key_id, key.dev_addr)
                    .await?;
                let pass = this.decrypt_and_decode(&device, &link, &mut uplink).await;
                let mutation = if changed.is_empty() {
                    Mutation::Keep
                } else {
                    Mutation::Write {
                        value: device.clone(),
                        paths: changed,
                    }
                };
                Ok((mutation, (device, uplink, pass)))
            },
        )
        .await?;
        if !pass {
            return Ok(Vec::new());
        }

        if let Err(e) = self.deps.uplinks.push(&device.ids, uplink.clone()).await {
            warn!(error = %e, "failed to store uplink");
        }
        match self.deps.locations.get(&device.ids).await {
            Ok(locations) => uplink.locations = locations,
            Err(e) => debug!(error = %e, "end device locations unavailable"),
        }

        if device.activated_at.is_none() {
            self.deps.activation.enqueue(device.ids.clone(), received_at);
        }
        let seen_at = uplink.received_at.unwrap_or(received_at);
        if let Err(e) = self.deps.last_seen.push(&device.ids, seen_at).await {
            warn!(error = %e, "failed to update last seen");
        }

        let normalized = uplink.normalized_payload.iter().map(|entry| {
            Up::UplinkNormalized(ApplicationUplinkNormalized {
                session_key_id: uplink.session_key_id.clone(),
                f_port: uplink.f_port,
                f_cnt: uplink.f_cnt,
                frm_payload: uplink.frm_payload.clone(),
                normalized_payload: entry.clone(),
                normalized_payload_warnings: uplink.normalized_payload_warnings.clone(),
                confirmed: uplink.confirmed,
                received_at: uplink.received_at,
                locations: uplink.locations.clone(),
            })
        });
        let mut published: Vec<Up> = normalized.collect();
        if let Some(location) = location_from_payload(uplink.decoded_payload.as_ref()) {
            published.push(Up::LocationSolved(ApplicationLocation {
                service: FRM_PAYLOAD_LOCATION_SERVICE.to_string(),
                location,
                attributes: Default::default(),
            }));
        }
        published.insert(0, Up::UplinkMessage(uplink));
        self.deps.metrics.inc_uplinks_forwarded();
        Ok(published)
    }

    /// Returns whether the uplink should be forwarded.
    async fn decrypt_and_decode(
        &self,
        device: &EndDevice,
        link: &ApplicationLink,
        uplink: &mut ApplicationUplink,
    ) -> bool {
        let Some(session) = device.session.as_ref() else {
            self.deps
                .metrics
                .record_drop(DropCause::DecryptFail, "no_device_session");
            return false;
        };
        match self
            .keys()
            .skips_payload_crypto(device.skip_payload_crypto_override, link, Some(session))
            .await
        {
            Ok(true) => {
                uplink.app_s_key = session.keys.app_s_key.clone();
                uplink.last_a_f_cnt_down = session.last_a_f_cnt_down;
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                self.deps.metrics.record_drop(DropCause::DecryptFail, &e.name());
                return false;
            }
        }

        let key = match self.keys().session_key(session).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                self.deps
                    .metrics
                    .record_drop(DropCause::DecryptFail, "app_s_key_not_unwrapped");
                return false;
            }
            Err(e) => {
                self.deps.metrics.record_drop(DropCause::DecryptFail, &e.name());
                return false;
            }
        };
        uplink.frm_payload = decrypt_uplink(&key, session.dev_addr, uplink.f_cnt, &uplink.frm_payload);
        uplink.last_a_f_cnt_down = session.last_a_f_cnt_down;
        uplink.version_ids = device.version_ids.clone();

        let formatters = effective_formatters(device, link);
        if let Err(e) = self
            .deps
            .formatters
            .decode_uplink(&formatters, device.version_ids.as_ref(), uplink)
            .await
        {
            self.deps.metrics.record_drop(DropCause::DecodeFail, &e.name());
            uplink.decoded_payload = None;
            uplink.normalized_payload.clear();
        }
        true
    }

    async fn handle_join_accept(
        &self,
        ids: &EndDeviceIdentifiers,
        link: &ApplicationLink,
        join_accept: ApplicationJoinAccept,
    ) -> DomainResult<ApplicationJoinAccept> {
        let this = self.clone();
        let key = ids.clone();
        let link = link.clone();
        let (_, (mut join_accept, recovered)) = set_device_with(
            self.deps.devices.as_ref(),
            ids,
            &paths(DOWNLINK_DEVICE_PATHS),
            move |stored| async move {
                let mut join_accept = join_accept;
                let mut device = stored.unwrap_or_else(|| EndDevice::new(key.clone()));
                let previous: Vec<Session> = [device.session.clone(), device.pending_session.clone()]
                    .into_iter()
                    .flatten()
                    .collect();

                let changed = this
                    .deps
                    .sessions
                    .install_pending(
                        &mut device,
                        &join_accept.session_key_id,
                        key.dev_addr,
                        join_accept.app_s_key.take(),
                    )
                    .await?;
                let skip = this
                    .keys()
                    .skips_payload_crypto(
                        device.skip_payload_crypto_override,
                        &link,
                        device.pending_session.as_ref(),
                    )
                    .await?;

                let invalidated = std::mem::take(&mut join_accept.invalidated_downlinks);
                let recovered = if skip {
                    Vec::new()
                } else {
                    this.recover_downlinks(
                        &previous,
                        invalidated,
                        Some(join_accept.session_key_id.as_slice()),
                    )
                    .await
                };

                let mutation = if changed.is_empty() {
                    Mutation::Keep
                } else {
                    Mutation::Write {
                        value: device,
                        paths: changed,
                    }
                };
                Ok((mutation, (join_accept, recovered)))
            },
        )
        .await?;

        if !recovered.is_empty() {
            debug!(count = recovered.len(), "pushing downlinks invalidated by join-accept");
            if let Err(e) = self
                .deps
                .queue
                .requeue(ids, recovered, vec![join_accept.session_key_id.clone()])
                .await
            {
                warn!(error = %e, "failed to push invalidated downlinks");
            }
        }
        join_accept.app_s_key = None;
        join_accept.invalidated_downlinks.clear();
        Ok(join_accept)
    }

    /// Returns the message when it must be forwarded upstream, which is
    /// only the case when payload crypto is skipped.
    async fn handle_invalidated(
        &self,
        ids: &EndDeviceIdentifiers,
        link: &ApplicationLink,
        invalidated: ApplicationInvalidatedDownlinks,
    ) -> DomainResult<Option<ApplicationInvalidatedDownlinks>> {
        let this = self.clone();
        let link = link.clone();
        let (_, (invalidated, recovered)) = set_device_with(
            self.deps.devices.as_ref(),
            ids,
            &paths(DOWNLINK_DEVICE_PATHS),
            move |stored| async move {
                let mut invalidated = invalidated;
                let Some(mut device) = stored else {
                    return Err(DomainError::NotFound("end device".to_string()));
                };
                if this
                    .keys()
                    .skips_payload_crypto(
                        device.skip_payload_crypto_override,
                        &link,
                        device.session.as_ref(),
                    )
                    .await?
                {
                    return Ok((Mutation::Keep, (invalidated, None)));
                }

                let mut changed = Vec::new();
                if let Some(session) = device.session.as_mut() {
                    let matches = invalidated.session_key_id.is_empty()
                        || session.session_key_id() == invalidated.session_key_id.as_slice();
                    if matches && invalidated.last_f_cnt_down > session.last_a_f_cnt_down {
                        session.last_a_f_cnt_down = invalidated.last_f_cnt_down;
                        changed.push("session.last_a_f_cnt_down".to_string());
                    }
                }
                let sessions: Vec<Session> = [device.session.clone(), device.pending_session.clone()]
                    .into_iter()
                    .flatten()
                    .collect();
                let items = std::mem::take(&mut invalidated.downlinks);
                let recovered = this.recover_downlinks(&sessions, items, None).await;

                let mutation = if changed.is_empty() {
                    Mutation::Keep
                } else {
                    Mutation::Write {
                        value: device,
                        paths: changed,
                    }
                };
                Ok((mutation, (invalidated, Some(recovered))))
            },
        )
        .await?;

        let Some(recovered) = recovered else {
            return Ok(Some(invalidated));
        };
        if !recovered.is_empty() {
            self.deps.queue.requeue(ids, recovered, Vec::new()).await?;
        }
        Ok(None)
    }

    /// Decrypts downlinks the Network Server gave back under the session
    /// they were encrypted with. Items of unknown sessions are dropped.
    async fn recover_downlinks(
        &self,
        sessions: &[Session],
        downlinks: Vec<ApplicationDownlink>,
        exclude_session_key_id: Option<&[u8]>,
    ) -> Vec<ApplicationDownlink> {
        let mut recovered = Vec::with_capacity(downlinks.len());
        for mut downlink in downlinks {
            if exclude_session_key_id == Some(downlink.session_key_id.as_slice()) {
                continue;
            }
            let Some(session) = sessions
                .iter()
                .find(|s| s.session_key_id() == downlink.session_key_id.as_slice())
            else {
                self.deps.metrics.record_drop(
                    DropCause::InvalidatedDownlinkUnknownSession,
                    &hex::encode(&downlink.session_key_id),
                );
                continue;
            };
            let key = match self.keys().session_key(session).await {
                Ok(Some(key)) => key,
                Ok(None) => {
                    self.deps
                        .metrics
                        .record_drop(DropCause::DecryptFail, "app_s_key_not_unwrapped");
                    continue;
                }
                Err(e) => {
                    self.deps.metrics.record_drop(DropCause::DecryptFail, &e.name());
                    continue;
                }
            };
            downlink.frm_payload =
                decrypt_downlink(&key, session.dev_addr, downlink.f_cnt, &downlink.frm_payload);
            downlink.decoded_payload = None;
            downlink.session_key_id.clear();
            downlink.f_cnt = 0;
            recovered.push(downlink);
        }
        recovered
    }

    async fn handle_nack(
        &self,
        ids: &EndDeviceIdentifiers,
        link: &ApplicationLink,
        nack: &mut ApplicationDownlink,
    ) -> DomainResult<()> {
        self.decrypt_event(ids, link, nack).await?;
        if let Err(e) = self.deps.queue.requeue_nack(ids, nack.clone()).await {
            warn!(error = %e, "failed to requeue nacked downlink");
        }
        Ok(())
    }

    /// Decrypts and decodes the downlink carried by a downlink event.
    async fn decrypt_event(
        &self,
        ids: &EndDeviceIdentifiers,
        link: &ApplicationLink,
        downlink: &mut ApplicationDownlink,
    ) -> DomainResult<()> {
        let device = self
            .deps
            .devices
            .get(ids, &paths(DOWNLINK_DEVICE_PATHS))
            .await?;
        let session = find_session(&device, &downlink.session_key_id)
            .ok_or_else(|| DomainError::NotFound("unknown_session".to_string()))?;
        if self
            .keys()
            .skips_payload_crypto(device.skip_payload_crypto_override, link, Some(session))
            .await?
        {
            return Ok(());
        }
        let key = self
            .keys()
            .session_key(session)
            .await?
            .ok_or_else(|| DomainError::FailedPrecondition("app_s_key_not_unwrapped".to_string()))?;
        downlink.frm_payload =
            decrypt_downlink(&key, session.dev_addr, downlink.f_cnt, &downlink.frm_payload);

        let formatters = effective_formatters(&device, link);
        if let Err(e) = self
            .deps
            .formatters
            .decode_downlink(&formatters, device.version_ids.as_ref(), downlink)
            .await
        {
            self.deps.metrics.record_drop(DropCause::DecodeFail, &e.name());
        }
        Ok(())
    }

    async fn store_location(
        &self,
        ids: &EndDeviceIdentifiers,
        location: &ApplicationLocation,
    ) -> DomainResult<()> {
        let service = location.service.clone();
        let solved = location.location.clone();
        self.deps
            .devices
            .set(
                ids,
                &["locations".to_string()],
                Box::new(move |stored| {
                    Box::pin(async move {
                        let Some(mut device) = stored else {
                            return Ok(Mutation::Keep);
                        };
                        device.locations.insert(service, solved);
                        Ok(Mutation::Write {
                            value: device,
                            paths: vec!["locations".to_string()],
                        })
                    })
                }),
            )
            .await?;
        Ok(())
    }
}

/// Reads a GPS position from a decoded payload: top level, under
/// `location`, or in the first CayenneLPP `gps_<channel>` field.
pub fn location_from_payload(decoded: Option<&Struct>) -> Option<Location> {
    let decoded = decoded?;
    let candidates = std::iter::once(decoded)
        .chain(decoded.get("location").and_then(Value::as_object))
        .chain(
            decoded
                .iter()
                .filter(|(k, _)| k.starts_with("gps_"))
                .filter_map(|(_, v)| v.as_object()),
        );
    for fields in candidates {
        let latitude = fields.get("latitude").and_then(Value::as_f64);
        let longitude = fields.get("longitude").and_then(Value::as_f64);
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            continue;
        };
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            continue;
        }
        let int_field = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_f64)
                .map(|v| v.round() as i32)
                .unwrap_or_default()
        };
        return Some(Location {
            latitude,
            longitude,
            altitude: int_field("altitude"),
            accuracy: int_field("accuracy"),
            source: LocationSource::SourceGps,
        });
    }
    None
}
