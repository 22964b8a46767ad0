use common::grpc::{run_grpc_server, GrpcServerConfig};
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tracing::debug;

use crate::nats::NsUplinkStream;

type RunnerProcess =
    Box<dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

/// The Application Server gRPC surface, optionally paired with the
/// Network Server uplink stream.
pub struct AsApi {
    routes: Routes,
    config: GrpcServerConfig,
    uplink_stream: Option<NsUplinkStream>,
}

impl AsApi {
    pub fn new(routes: Routes, config: GrpcServerConfig) -> Self {
        debug!("initializing application server API");
        Self {
            routes,
            config,
            uplink_stream: None,
        }
    }

    pub fn with_uplink_stream(mut self, stream: NsUplinkStream) -> Self {
        self.uplink_stream = Some(stream);
        self
    }

    /// One process for the gRPC server and one for the uplink stream when
    /// configured.
    pub fn into_runner_processes(self) -> Vec<(&'static str, RunnerProcess)> {
        let mut processes: Vec<(&'static str, RunnerProcess)> = Vec::new();
        let routes = self.routes;
        let config = self.config;
        processes.push((
            "as-grpc",
            Box::new(move |ctx| Box::pin(async move { run_grpc_server(config, routes, ctx).await })),
        ));
        if let Some(stream) = self.uplink_stream {
            processes.push((
                "as-ns-uplinks",
                Box::new(move |ctx| Box::pin(async move { stream.run(ctx).await })),
            ));
        }
        processes
    }
}
