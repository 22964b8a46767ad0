use common::domain::{AesKey, ApplicationPackage};
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AsConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // gRPC configuration
    #[serde(default = "default_grpc_host")]
    pub grpc_host: String,

    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// Enable gRPC-Web support for browser clients
    #[serde(default = "default_grpc_web_enabled")]
    pub grpc_web_enabled: bool,

    /// CORS allowed origins (comma-separated list, "*" for all origins)
    #[serde(default = "default_grpc_cors_allowed_origins")]
    pub grpc_cors_allowed_origins: String,

    /// gRPC path prefixes excluded from request logging and tracing
    /// (comma-separated)
    #[serde(default = "default_grpc_ignored_paths")]
    pub grpc_ignored_paths: String,

    // HTTP configuration (webhook downlink API)
    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    // NATS configuration
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    #[serde(default = "default_nats_connect_timeout_secs")]
    pub nats_connect_timeout_secs: u64,

    /// Consume the uplinks the Network Server publishes to JetStream
    #[serde(default = "default_ns_uplink_stream_enabled")]
    pub ns_uplink_stream_enabled: bool,

    #[serde(default = "default_ns_uplink_stream")]
    pub ns_uplink_stream: String,

    #[serde(default = "default_ns_uplink_subject")]
    pub ns_uplink_subject: String,

    #[serde(default = "default_ns_uplink_consumer")]
    pub ns_uplink_consumer: String,

    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Subject prefix of the cluster-wide upstream distributor
    #[serde(default = "default_cluster_subject_prefix")]
    pub cluster_subject_prefix: String,

    // Cluster peers
    /// Hex keys accepted from and sent to cluster peers (comma-separated)
    #[serde(default)]
    pub cluster_keys: String,

    #[serde(default = "default_network_server_address")]
    pub network_server_address: String,

    /// Cluster Join Server; empty disables AppSKey lookups there
    #[serde(default)]
    pub join_server_address: String,

    /// Entity registry; empty keeps activations and locations in memory
    #[serde(default)]
    pub entity_registry_address: String,

    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,

    /// Backend interfaces Join Server URL; empty disables interop lookups
    #[serde(default)]
    pub interop_url: String,

    /// Sent as `SenderID` to the interop Join Server
    #[serde(default)]
    pub interop_as_id: String,

    // Authentication and keys
    /// API key grants, `key=token_id:application_id:right+right` (comma-separated)
    #[serde(default)]
    pub api_keys: String,

    /// Key encryption keys, `label=hex` (comma-separated)
    #[serde(default)]
    pub keks: String,

    /// KEK used to wrap session keys received in the clear
    #[serde(default)]
    pub kek_label: String,

    /// Hex prefix of the session key IDs issued by the cluster Join Server
    #[serde(default)]
    pub local_session_key_id_prefix: String,

    // Default link
    #[serde(default)]
    pub default_skip_payload_crypto: Option<bool>,

    // Payload formatters
    #[serde(default = "default_formatter_script_timeout_ms")]
    pub formatter_script_timeout_ms: u64,

    #[serde(default = "default_formatter_max_parameter_length")]
    pub formatter_max_parameter_length: usize,

    // Worker pools
    #[serde(default = "default_pool_max_workers")]
    pub uplink_pool_max_workers: usize,

    #[serde(default = "default_pool_queue_size")]
    pub uplink_pool_queue_size: usize,

    #[serde(default = "default_pool_max_workers")]
    pub activation_pool_max_workers: usize,

    #[serde(default = "default_pool_max_workers")]
    pub webhook_pool_max_workers: usize,

    #[serde(default = "default_pool_queue_size")]
    pub webhook_pool_queue_size: usize,

    // Distributors
    #[serde(default = "default_distributor_buffer_size")]
    pub distributor_buffer_size: usize,

    /// Wait for slow subscribers instead of dropping messages
    #[serde(default)]
    pub distributor_blocking: bool,

    /// Lifetime of an idle cluster distributor subscription
    #[serde(default = "default_distributor_timeout_secs")]
    pub distributor_timeout_secs: u64,

    // Last seen
    #[serde(default = "default_last_seen_batch_size")]
    pub last_seen_batch_size: usize,

    /// Zero disables last-seen reporting
    #[serde(default = "default_last_seen_flush_interval_secs")]
    pub last_seen_flush_interval_secs: u64,

    // Storage
    /// Recent uplinks kept per device
    #[serde(default = "default_uplink_storage_limit")]
    pub uplink_storage_limit: usize,

    #[serde(default = "default_location_cache_ttl_secs")]
    pub location_cache_ttl_secs: u64,

    #[serde(default = "default_location_error_ttl_secs")]
    pub location_error_ttl_secs: u64,

    #[serde(default = "default_registry_lock_ttl_secs")]
    pub registry_lock_ttl_secs: u64,

    // Webhooks
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    /// Failed deliveries before a webhook is disabled; zero only monitors
    #[serde(default = "default_webhook_unhealthy_attempts_threshold")]
    pub webhook_unhealthy_attempts_threshold: u64,

    #[serde(default = "default_webhook_unhealthy_retry_interval_secs")]
    pub webhook_unhealthy_retry_interval_secs: u64,

    /// Downlink API requests per second per caller; zero disables limiting
    #[serde(default = "default_webhook_downlink_rate")]
    pub webhook_downlink_rate: u64,

    #[serde(default = "default_webhook_downlink_burst")]
    pub webhook_downlink_burst: u64,

    /// Public base URL of the downlink API announced to webhook targets
    #[serde(default)]
    pub webhook_downlink_public_address: String,

    /// Sent as `X-Tts-Domain`
    #[serde(default)]
    pub webhook_domain: String,

    /// JSON file with webhook templates; empty serves no templates
    #[serde(default)]
    pub webhook_templates_file: String,

    // Pub/sub
    #[serde(default = "default_pubsub_connect_timeout_secs")]
    pub pubsub_connect_timeout_secs: u64,

    #[serde(default = "default_pubsub_retry_delay_secs")]
    pub pubsub_retry_delay_secs: u64,

    /// Zero retries forever
    #[serde(default)]
    pub pubsub_max_retry_attempts: u32,

    /// Registered application packages, `name:default_f_port` (comma-separated)
    #[serde(default)]
    pub packages: String,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    /// Grace period for processes and closers at shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_grpc_host() -> String {
    "0.0.0.0".to_string()
}

fn default_grpc_port() -> u16 {
    8884
}

fn default_grpc_web_enabled() -> bool {
    true
}

fn default_grpc_cors_allowed_origins() -> String {
    "*".to_string()
}

fn default_grpc_ignored_paths() -> String {
    "/grpc.reflection.,/grpc.health.".to_string()
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8885
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_connect_timeout_secs() -> u64 {
    10
}

fn default_ns_uplink_stream_enabled() -> bool {
    true
}

fn default_ns_uplink_stream() -> String {
    "ns_uplinks".to_string()
}

fn default_ns_uplink_subject() -> String {
    "ns.as.up.>".to_string()
}

fn default_ns_uplink_consumer() -> String {
    "application-server".to_string()
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_cluster_subject_prefix() -> String {
    "as.up".to_string()
}

fn default_network_server_address() -> String {
    "http://localhost:1884".to_string()
}

fn default_peer_timeout_secs() -> u64 {
    10
}

fn default_formatter_script_timeout_ms() -> u64 {
    100
}

fn default_formatter_max_parameter_length() -> usize {
    application_server::domain::DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH
}

fn default_pool_max_workers() -> usize {
    1024
}

fn default_pool_queue_size() -> usize {
    64
}

fn default_distributor_buffer_size() -> usize {
    32
}

fn default_distributor_timeout_secs() -> u64 {
    60
}

fn default_last_seen_batch_size() -> usize {
    1000
}

fn default_last_seen_flush_interval_secs() -> u64 {
    10
}

fn default_uplink_storage_limit() -> usize {
    16
}

fn default_location_cache_ttl_secs() -> u64 {
    12 * 60 * 60
}

fn default_location_error_ttl_secs() -> u64 {
    60
}

fn default_registry_lock_ttl_secs() -> u64 {
    5
}

fn default_webhook_timeout_secs() -> u64 {
    5
}

fn default_webhook_unhealthy_attempts_threshold() -> u64 {
    16
}

fn default_webhook_unhealthy_retry_interval_secs() -> u64 {
    60
}

fn default_webhook_downlink_rate() -> u64 {
    10
}

fn default_webhook_downlink_burst() -> u64 {
    20
}

fn default_pubsub_connect_timeout_secs() -> u64 {
    10
}

fn default_pubsub_retry_delay_secs() -> u64 {
    5
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "application-server".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl AsConfig {
    /// Load configuration from `AS_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("AS"))
            .build()?
            .try_deserialize()
    }

    pub fn ignored_paths(&self) -> Vec<String> {
        split_list(&self.grpc_ignored_paths)
            .map(str::to_string)
            .collect()
    }

    /// KEKs by label.
    pub fn keks(&self) -> anyhow::Result<HashMap<String, AesKey>> {
        split_list(&self.keks)
            .map(|entry| {
                let (label, key) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("invalid KEK `{}`, expected label=hex", entry))?;
                let key: AesKey = key
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid KEK `{}`: {}", label.trim(), e))?;
                Ok((label.trim().to_string(), key))
            })
            .collect()
    }

    pub fn local_session_key_id_prefix(&self) -> anyhow::Result<Vec<u8>> {
        hex::decode(self.local_session_key_id_prefix.trim())
            .map_err(|e| anyhow::anyhow!("invalid session key ID prefix: {}", e))
    }

    pub fn packages(&self) -> anyhow::Result<Vec<ApplicationPackage>> {
        split_list(&self.packages)
            .map(|entry| {
                let (name, f_port) = entry.split_once(':').ok_or_else(|| {
                    anyhow::anyhow!("invalid package `{}`, expected name:f_port", entry)
                })?;
                let default_f_port = f_port
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid f_port of package `{}`: {}", name, e))?;
                Ok(ApplicationPackage {
                    name: name.trim().to_string(),
                    default_f_port,
                })
            })
            .collect()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::remove_var("AS_LOG_LEVEL");
            std::env::remove_var("AS_GRPC_PORT");
        }

        let config = AsConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.grpc_port, 8884);
        assert_eq!(config.uplink_storage_limit, 16);
        assert_eq!(config.default_skip_payload_crypto, None);
        assert!(config.keks().unwrap().is_empty());
        assert!(config.packages().unwrap().is_empty());
        assert!(config.local_session_key_id_prefix().unwrap().is_empty());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("AS_LOG_LEVEL", "debug");
            std::env::set_var("AS_GRPC_PORT", "9000");
        }

        let config = AsConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.grpc_port, 9000);

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::remove_var("AS_LOG_LEVEL");
            std::env::remove_var("AS_GRPC_PORT");
        }
    }

    fn config() -> AsConfig {
        let _lock = TEST_LOCK.lock().unwrap();
        AsConfig::from_env().unwrap()
    }

    #[test]
    fn test_keks() {
        let mut config = config();
        config.keks = format!("kek-a={}, kek-b={}", "01".repeat(16), "02".repeat(16));

        let keks = config.keks().unwrap();

        assert_eq!(keks.len(), 2);
        assert_eq!(keks["kek-a"], AesKey([0x01; 16]));
        assert_eq!(keks["kek-b"], AesKey([0x02; 16]));
    }

    #[test]
    fn test_invalid_kek() {
        let mut config = config();

        config.keks = "kek-a".to_string();
        assert!(config.keks().is_err());

        config.keks = "kek-a=0102".to_string();
        assert!(config.keks().is_err());
    }

    #[test]
    fn test_packages() {
        let mut config = config();
        config.packages = "lora-cloud-device-management-v1:199,test-package:1".to_string();

        let packages = config.packages().unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "lora-cloud-device-management-v1");
        assert_eq!(packages[0].default_f_port, 199);

        config.packages = "test-package:port".to_string();
        assert!(config.packages().is_err());
    }

    #[test]
    fn test_ignored_paths() {
        let mut config = config();
        config.grpc_ignored_paths = " /grpc.health., ,/foo ".to_string();

        assert_eq!(config.ignored_paths(), vec!["/grpc.health.", "/foo"]);
    }
}
