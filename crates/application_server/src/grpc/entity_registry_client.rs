use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::auth::ClusterAuth;
use common::domain::{DomainResult, EndDeviceIdentifiers, Location};
use common::grpc::status_to_domain_error;
use common::proto::end_device_batch_registry_client::EndDeviceBatchRegistryClient;
use common::proto::end_device_registry_client::EndDeviceRegistryClient;
use common::proto::{
    datetime_to_timestamp, from_proto_locations, to_field_mask, to_proto_end_device_ids,
    BatchUpdateEndDeviceLastSeenRequest, EndDevice, EndDeviceLastSeenUpdate, GetEndDeviceRequest,
    SetEndDeviceRequest,
};
use std::collections::HashMap;
use tonic::transport::Channel;
use tracing::{debug, instrument};

use super::network_server_client::cluster_request;
use crate::domain::{EntityRegistry, LastSeenUpdate};

/// Cluster entity registry reached over the end device registry services.
pub struct GrpcEntityRegistry {
    devices: EndDeviceRegistryClient<Channel>,
    batch: EndDeviceBatchRegistryClient<Channel>,
    cluster: ClusterAuth,
}

impl GrpcEntityRegistry {
    pub fn new(channel: Channel, cluster: ClusterAuth) -> Self {
        Self {
            devices: EndDeviceRegistryClient::new(channel.clone()),
            batch: EndDeviceBatchRegistryClient::new(channel),
            cluster,
        }
    }
}

#[async_trait]
impl EntityRegistry for GrpcEntityRegistry {
    #[instrument(skip(self), fields(device = %ids.unique_id()))]
    async fn get_locations(
        &self,
        ids: &EndDeviceIdentifiers,
    ) -> DomainResult<HashMap<String, Location>> {
        let request = GetEndDeviceRequest {
            end_device_ids: Some(to_proto_end_device_ids(ids.clone())),
            field_mask: to_field_mask(&["locations".to_string()]),
        };
        let device = self
            .devices
            .clone()
            .get(cluster_request(request, &self.cluster)?)
            .await
            .map_err(status_to_domain_error)?
            .into_inner();
        Ok(from_proto_locations(device.locations))
    }

    #[instrument(skip(self), fields(device = %ids.unique_id()))]
    async fn set_activated_at(
        &self,
        ids: &EndDeviceIdentifiers,
        activated_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let request = SetEndDeviceRequest {
            end_device: Some(EndDevice {
                ids: Some(to_proto_end_device_ids(ids.clone())),
                activated_at: datetime_to_timestamp(Some(activated_at)),
                ..Default::default()
            }),
            field_mask: to_field_mask(&["activated_at".to_string()]),
        };
        self.devices
            .clone()
            .update(cluster_request(request, &self.cluster)?)
            .await
            .map_err(status_to_domain_error)?;
        debug!("activation recorded in entity registry");
        Ok(())
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_last_seen(&self, updates: Vec<LastSeenUpdate>) -> DomainResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let request = BatchUpdateEndDeviceLastSeenRequest {
            updates: updates
                .into_iter()
                .map(|u| EndDeviceLastSeenUpdate {
                    ids: Some(to_proto_end_device_ids(u.ids)),
                    last_seen_at: datetime_to_timestamp(Some(u.last_seen_at)),
                })
                .collect(),
        };
        self.batch
            .clone()
            .update_last_seen(cluster_request(request, &self.cluster)?)
            .await
            .map_err(status_to_domain_error)?;
        Ok(())
    }
}
