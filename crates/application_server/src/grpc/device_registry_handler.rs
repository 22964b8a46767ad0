use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

use common::grpc::require_rights;
use crate::domain::DeviceService;
use common::auth::{Right, RightsFetcher};
use common::domain::field_mask;
use common::grpc::domain_error_to_status;
use common::proto::as_end_device_registry_server::AsEndDeviceRegistry as AsEndDeviceRegistryTrait;
use common::proto::{
    field_mask_paths, from_proto_end_device, from_proto_end_device_ids, to_proto_end_device,
    EndDevice, EndDeviceIdentifiers, GetEndDeviceRequest, SetEndDeviceRequest,
};

const KEY_PATHS: &[&str] = &["session.keys", "pending_session.keys"];

/// An empty mask selects the session keys too.
fn with_key_right(paths: &[String], base: Right, keys: Right) -> Vec<Right> {
    if paths.is_empty() || field_mask::has_any(paths, KEY_PATHS) {
        vec![base, keys]
    } else {
        vec![base]
    }
}

/// gRPC handler for the Application Server end device registry.
pub struct AsEndDeviceRegistryHandler {
    devices: Arc<DeviceService>,
    rights: Arc<dyn RightsFetcher>,
}

impl AsEndDeviceRegistryHandler {
    pub fn new(devices: Arc<DeviceService>, rights: Arc<dyn RightsFetcher>) -> Self {
        Self { devices, rights }
    }
}

#[tonic::async_trait]
impl AsEndDeviceRegistryTrait for AsEndDeviceRegistryHandler {
    #[instrument(name = "GetEndDevice", skip(self, request))]
    async fn get(
        &self,
        request: Request<GetEndDeviceRequest>,
    ) -> Result<Response<EndDevice>, Status> {
        let ids = from_proto_end_device_ids(request.get_ref().end_device_ids.clone())
            .map_err(domain_error_to_status)?;
        let paths = field_mask_paths(request.get_ref().field_mask.clone());
        let required = with_key_right(
            &paths,
            Right::ApplicationDevicesRead,
            Right::ApplicationDevicesReadKeys,
        );
        require_rights(self.rights.as_ref(), &request, &ids.application_ids, &required).await?;

        let device = self
            .devices
            .get(&ids, &paths)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(to_proto_end_device(device)))
    }

    #[instrument(name = "SetEndDevice", skip(self, request))]
    async fn set(
        &self,
        request: Request<SetEndDeviceRequest>,
    ) -> Result<Response<EndDevice>, Status> {
        let device = from_proto_end_device(request.get_ref().end_device.clone().unwrap_or_default())
            .map_err(domain_error_to_status)?;
        let paths = field_mask_paths(request.get_ref().field_mask.clone());
        let required = with_key_right(
            &paths,
            Right::ApplicationDevicesWrite,
            Right::ApplicationDevicesWriteKeys,
        );
        require_rights(
            self.rights.as_ref(),
            &request,
            &device.ids.application_ids,
            &required,
        )
        .await?;

        let device = self
            .devices
            .set(device, &paths)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(to_proto_end_device(device)))
    }

    #[instrument(name = "DeleteEndDevice", skip(self, request))]
    async fn delete(
        &self,
        request: Request<EndDeviceIdentifiers>,
    ) -> Result<Response<()>, Status> {
        let ids = from_proto_end_device_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationDevicesWrite],
        )
        .await?;

        self.devices
            .delete(&ids)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_key_paths_need_key_rights() {
        assert_eq!(
            with_key_right(
                &paths(&["session"]),
                Right::ApplicationDevicesRead,
                Right::ApplicationDevicesReadKeys
            ),
            vec![Right::ApplicationDevicesRead, Right::ApplicationDevicesReadKeys]
        );
        assert_eq!(
            with_key_right(
                &paths(&["formatters", "session.dev_addr"]),
                Right::ApplicationDevicesWrite,
                Right::ApplicationDevicesWriteKeys
            ),
            vec![Right::ApplicationDevicesWrite]
        );
        assert_eq!(
            with_key_right(&[], Right::ApplicationDevicesRead, Right::ApplicationDevicesReadKeys)
                .len(),
            2
        );
    }
}
