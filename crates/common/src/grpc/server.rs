//! gRPC server shared by the Application Server surfaces, with optional
//! gRPC-Web and CORS.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use http::{header::HeaderName, Method};
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;
use tonic_web::GrpcWebLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, info};

use super::{GrpcLoggingConfig, GrpcLoggingLayer, GrpcTracingConfig, GrpcTracingLayer};

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// `*` allows every origin.
    pub allowed_origins: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age_secs: 3600,
        }
    }
}

impl CorsConfig {
    pub fn from_comma_separated(origins: &str) -> Self {
        let allowed_origins: Vec<String> = origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if allowed_origins.is_empty() {
            return Self::default();
        }
        Self {
            allowed_origins,
            ..Self::default()
        }
    }

    fn layer(&self) -> CorsLayer {
        let allow_origin = if self.allowed_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(
                self.allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok()),
            )
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([
                HeaderName::from_static("content-type"),
                HeaderName::from_static("x-grpc-web"),
                HeaderName::from_static("x-user-agent"),
                HeaderName::from_static("grpc-timeout"),
                HeaderName::from_static("authorization"),
            ])
            .expose_headers([
                HeaderName::from_static("grpc-status"),
                HeaderName::from_static("grpc-message"),
                HeaderName::from_static("grpc-status-details-bin"),
            ])
            .max_age(Duration::from_secs(self.max_age_secs))
    }
}

#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    pub host: String,
    pub port: u16,
    pub logging_config: GrpcLoggingConfig,
    pub tracing_config: GrpcTracingConfig,
    /// Accept HTTP/1.1 gRPC-Web requests.
    pub enable_grpc_web: bool,
    /// Only used when gRPC-Web is enabled.
    pub cors_config: Option<CorsConfig>,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8884,
            logging_config: GrpcLoggingConfig::default(),
            tracing_config: GrpcTracingConfig::default(),
            enable_grpc_web: false,
            cors_config: None,
        }
    }
}

impl GrpcServerConfig {
    pub fn address(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid gRPC address {}:{}", self.host, self.port))
    }
}

/// Serves `routes` until `cancellation_token` fires.
pub async fn run_grpc_server(
    config: GrpcServerConfig,
    routes: Routes,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config.address()?;
    info!(address = %addr, grpc_web = config.enable_grpc_web, "starting gRPC server");

    let shutdown = async move {
        cancellation_token.cancelled().await;
        debug!("gRPC server shutdown signal received");
    };
    let logging = GrpcLoggingLayer::new(config.logging_config.clone());
    let tracing = GrpcTracingLayer::new(config.tracing_config.clone());

    let served = if config.enable_grpc_web {
        let cors = config.cors_config.clone().unwrap_or_default().layer();
        Server::builder()
            .accept_http1(true)
            .layer(tracing)
            .layer(logging)
            .layer(cors)
            .layer(GrpcWebLayer::new())
            .add_routes(routes)
            .serve_with_shutdown(addr, shutdown)
            .await
    } else {
        Server::builder()
            .layer(tracing)
            .layer(logging)
            .add_routes(routes)
            .serve_with_shutdown(addr, shutdown)
            .await
    };

    match served {
        Ok(()) => {
            debug!("gRPC server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "gRPC server error");
            Err(e.into())
        }
    }
}
