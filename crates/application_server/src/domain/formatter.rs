use async_trait::async_trait;
use common::domain::{
    ApplicationDownlink, ApplicationUplink, DomainError, DomainResult, MessagePayloadFormatters,
    PayloadFormatter, Struct, VersionIdentifiers,
};
use payload::{CayenneLpp, PayloadCodec, PayloadError, ScriptInput, ScriptRunner};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Device repository publishing formatters per device model.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FormatterRepository: Send + Sync {
    async fn get_formatters(
        &self,
        version_ids: &VersionIdentifiers,
    ) -> DomainResult<Option<MessagePayloadFormatters>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryFormatterRepository {
    formatters: HashMap<VersionIdentifiers, MessagePayloadFormatters>,
}

impl InMemoryFormatterRepository {
    pub fn new(formatters: HashMap<VersionIdentifiers, MessagePayloadFormatters>) -> Self {
        Self { formatters }
    }
}

#[async_trait]
impl FormatterRepository for InMemoryFormatterRepository {
    async fn get_formatters(
        &self,
        version_ids: &VersionIdentifiers,
    ) -> DomainResult<Option<MessagePayloadFormatters>> {
        Ok(self.formatters.get(version_ids).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn pick(self, formatters: &MessagePayloadFormatters) -> (PayloadFormatter, &str) {
        match self {
            Direction::Up => (formatters.up_formatter, &formatters.up_formatter_parameter),
            Direction::Down => (
                formatters.down_formatter,
                &formatters.down_formatter_parameter,
            ),
        }
    }
}

/// Runs the payload formatter selected for a device.
///
/// Formatters set on the device win over the application link defaults.
/// `REPOSITORY` resolves through the device model's published formatters.
pub struct PayloadFormatterService {
    runner: ScriptRunner,
    repository: Arc<dyn FormatterRepository>,
    lpp: CayenneLpp,
}

impl PayloadFormatterService {
    pub fn new(runner: ScriptRunner, repository: Arc<dyn FormatterRepository>) -> Self {
        Self {
            runner,
            repository,
            lpp: CayenneLpp::new(),
        }
    }

    async fn resolve(
        &self,
        formatters: &MessagePayloadFormatters,
        version_ids: Option<&VersionIdentifiers>,
        direction: Direction,
    ) -> DomainResult<Option<(PayloadFormatter, String)>> {
        let (formatter, parameter) = direction.pick(formatters);
        match formatter {
            PayloadFormatter::None => Ok(None),
            PayloadFormatter::Repository => {
                let Some(version_ids) = version_ids else {
                    debug!("repository formatter without version identifiers");
                    return Ok(None);
                };
                let Some(published) = self.repository.get_formatters(version_ids).await? else {
                    return Ok(None);
                };
                let (formatter, parameter) = direction.pick(&published);
                match formatter {
                    PayloadFormatter::None | PayloadFormatter::Repository => Ok(None),
                    other => Ok(Some((other, parameter.to_string()))),
                }
            }
            other => Ok(Some((other, parameter.to_string()))),
        }
    }

    /// Fills the decoded and normalized payloads of a decrypted uplink.
    #[instrument(skip_all, fields(f_port = uplink.f_port))]
    pub async fn decode_uplink(
        &self,
        formatters: &MessagePayloadFormatters,
        version_ids: Option<&VersionIdentifiers>,
        uplink: &mut ApplicationUplink,
    ) -> DomainResult<()> {
        let Some((formatter, parameter)) = self.resolve(formatters, version_ids, Direction::Up).await?
        else {
            return Ok(());
        };
        match formatter {
            PayloadFormatter::CayenneLpp => {
                let decoded = self.lpp.decode(&uplink.frm_payload).map_err(formatter_error)?;
                uplink.decoded_payload = Some(into_struct(decoded)?);
            }
            PayloadFormatter::Javascript => {
                let decoded = self
                    .runner
                    .decode_uplink(
                        &parameter,
                        script_input(uplink.frm_payload.clone(), uplink.f_port, version_ids),
                    )
                    .await
                    .map_err(formatter_error)?;
                uplink.decoded_payload = Some(decoded.data);
                uplink.decoded_payload_warnings = decoded.warnings;
                uplink.normalized_payload = decoded.normalized;
            }
            PayloadFormatter::None | PayloadFormatter::Repository => {}
        }
        Ok(())
    }

    /// Encodes `decoded_payload` into `frm_payload`. Downlinks that already
    /// carry a binary payload are left untouched.
    #[instrument(skip_all, fields(f_port = downlink.f_port))]
    pub async fn encode_downlink(
        &self,
        formatters: &MessagePayloadFormatters,
        version_ids: Option<&VersionIdentifiers>,
        downlink: &mut ApplicationDownlink,
    ) -> DomainResult<()> {
        if !downlink.frm_payload.is_empty() {
            return Ok(());
        }
        let Some(decoded) = downlink.decoded_payload.clone() else {
            return Ok(());
        };
        let Some((formatter, parameter)) = self
            .resolve(formatters, version_ids, Direction::Down)
            .await?
        else {
            return Err(DomainError::InvalidArgument(
                "no downlink formatter configured for decoded payload".to_string(),
            ));
        };
        match formatter {
            PayloadFormatter::CayenneLpp => {
                downlink.frm_payload = self.lpp.encode(&decoded).map_err(formatter_error)?;
            }
            PayloadFormatter::Javascript => {
                let encoded = self
                    .runner
                    .encode_downlink(
                        &parameter,
                        decoded,
                        script_input(Vec::new(), downlink.f_port, version_ids),
                    )
                    .await
                    .map_err(formatter_error)?;
                downlink.frm_payload = encoded.bytes;
                if let Some(f_port) = encoded.f_port {
                    downlink.f_port = f_port;
                }
                downlink.decoded_payload_warnings = encoded.warnings;
            }
            PayloadFormatter::None | PayloadFormatter::Repository => {}
        }
        Ok(())
    }

    /// Decodes a decrypted downlink for presentation. Only binary codecs
    /// can be inverted; scripted formatters leave the downlink as is.
    pub async fn decode_downlink(
        &self,
        formatters: &MessagePayloadFormatters,
        version_ids: Option<&VersionIdentifiers>,
        downlink: &mut ApplicationDownlink,
    ) -> DomainResult<()> {
        let resolved = self
            .resolve(formatters, version_ids, Direction::Down)
            .await?;
        if let Some((PayloadFormatter::CayenneLpp, _)) = resolved {
            let decoded = self.lpp.decode(&downlink.frm_payload).map_err(formatter_error)?;
            downlink.decoded_payload = Some(into_struct(decoded)?);
        }
        Ok(())
    }
}

fn script_input(
    bytes: Vec<u8>,
    f_port: u32,
    version_ids: Option<&VersionIdentifiers>,
) -> ScriptInput {
    ScriptInput {
        bytes,
        f_port,
        version_ids: version_ids.and_then(|v| serde_json::to_value(v).ok()),
    }
}

fn into_struct(value: Value) -> DomainResult<Struct> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DomainError::InvalidArgument(format!(
            "decoded payload must be an object, got {}",
            other
        ))),
    }
}

fn formatter_error(error: PayloadError) -> DomainError {
    match error {
        PayloadError::Timeout(_) => DomainError::Aborted(error.to_string()),
        other => DomainError::InvalidArgument(format!("payload formatter: {}", other)),
    }
}
