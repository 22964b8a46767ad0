use opentelemetry_sdk::{logs::LoggerProvider, trace::TracerProvider};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Reported as the OpenTelemetry `service.name` resource attribute.
    pub service_name: String,
    pub otel_endpoint: String,
    pub otel_enabled: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "application-server".to_string(),
            otel_endpoint: "http://localhost:4317".to_string(),
            otel_enabled: false,
            log_level: "info".to_string(),
        }
    }
}

/// Providers kept alive until [`super::shutdown_telemetry`] flushes them.
pub struct TelemetryProviders {
    pub tracer_provider: TracerProvider,
    pub logger_provider: LoggerProvider,
}
