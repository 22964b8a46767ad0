use common::proto::app_as_server::AppAsServer;
use common::proto::application_package_registry_server::ApplicationPackageRegistryServer;
use common::proto::as_end_device_registry_server::AsEndDeviceRegistryServer;
use common::proto::as_server::AsServer;
use common::proto::ns_as_server::NsAsServer;
use tonic::service::Routes;

use super::{AppAsHandler, AsEndDeviceRegistryHandler, AsHandler, NsAsHandler, PackageRegistryHandler};

/// Handlers served on the Application Server gRPC port.
pub struct AsGrpcServices {
    pub link: AsHandler,
    pub ns_as: NsAsHandler,
    pub devices: AsEndDeviceRegistryHandler,
    pub app_as: AppAsHandler,
    pub packages: PackageRegistryHandler,
}

/// Integrations add their registries to the returned routes with
/// `Routes::add_service`.
pub fn build_as_routes(services: AsGrpcServices) -> Routes {
    let mut builder = Routes::builder();
    builder
        .add_service(AsServer::new(services.link))
        .add_service(NsAsServer::new(services.ns_as))
        .add_service(AsEndDeviceRegistryServer::new(services.devices))
        .add_service(AppAsServer::new(services.app_as))
        .add_service(ApplicationPackageRegistryServer::new(services.packages));
    builder.routes()
}
