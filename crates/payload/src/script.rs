//! Sandboxed execution of scripted formatters.
//!
//! Each run compiles the expression and evaluates it on the blocking pool,
//! bounded by a wall-clock timeout that does not depend on the caller.

use cel_interpreter::objects::Key;
use cel_interpreter::Value as CelValue;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::cel::{cel_value_to_bytes, cel_value_to_json};
use crate::{CelEnvironment, PayloadError, Result};

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_millis(100);

/// Message fields exposed to a script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptInput {
    pub bytes: Vec<u8>,
    pub f_port: u32,
    pub version_ids: Option<Value>,
}

/// Output of an uplink decoder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedUplink {
    pub data: Map<String, Value>,
    pub warnings: Vec<String>,
    /// Normalized measurements, one per entry of the script's `normalized`.
    pub normalized: Vec<Map<String, Value>>,
}

/// Output of a downlink encoder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedDownlink {
    pub bytes: Vec<u8>,
    /// Port requested by the script, if any.
    pub f_port: Option<u32>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    env: CelEnvironment,
    timeout: Duration,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SCRIPT_TIMEOUT)
    }
}

impl ScriptRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            env: CelEnvironment::new(),
            timeout,
        }
    }

    /// Runs an uplink decoder. The script returns either the decoded object
    /// or `{data, warnings, errors, normalized}`.
    pub async fn decode_uplink(&self, script: &str, input: ScriptInput) -> Result<DecodedUplink> {
        let value = self.run(script, input, None).await?;
        parse_decoded(cel_value_to_json(value)?)
    }

    /// Runs a downlink encoder with `data` bound to the decoded payload. The
    /// script returns bytes, a list of byte values, or
    /// `{bytes, f_port, warnings, errors}`.
    pub async fn encode_downlink(
        &self,
        script: &str,
        data: Map<String, Value>,
        input: ScriptInput,
    ) -> Result<EncodedDownlink> {
        let value = self.run(script, input, Some(data)).await?;
        parse_encoded(value)
    }

    async fn run(
        &self,
        script: &str,
        input: ScriptInput,
        data: Option<Map<String, Value>>,
    ) -> Result<CelValue> {
        let env = self.env;
        let script = script.to_string();
        let mut variables = Map::new();
        variables.insert("f_port".to_string(), Value::from(input.f_port));
        variables.insert(
            "version_ids".to_string(),
            input.version_ids.unwrap_or_else(|| Value::Object(Map::new())),
        );
        if let Some(data) = data {
            variables.insert("data".to_string(), Value::Object(data));
        }
        let bytes = input.bytes;

        let task = tokio::task::spawn_blocking(move || env.evaluate(&script, &bytes, &variables));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PayloadError::CelExecutionError(join_error.to_string())),
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis(), "script timed out");
                Err(PayloadError::Timeout(self.timeout))
            }
        }
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn check_errors(object: &Map<String, Value>) -> Result<()> {
    let errors = strings(object.get("errors"));
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PayloadError::ScriptErrors(errors))
    }
}

fn parse_decoded(value: Value) -> Result<DecodedUplink> {
    let Value::Object(mut object) = value else {
        return Err(PayloadError::InvalidOutput(
            "decoder must return an object".to_string(),
        ));
    };
    if !matches!(object.get("data"), Some(Value::Object(_))) {
        return Ok(DecodedUplink {
            data: object,
            ..Default::default()
        });
    }

    check_errors(&object)?;
    let warnings = strings(object.get("warnings"));
    let normalized = match object.remove("normalized") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(m) => Ok(m),
                _ => Err(PayloadError::InvalidOutput(
                    "normalized entries must be objects".to_string(),
                )),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Object(m)) => vec![m],
        _ => Vec::new(),
    };
    let data = match object.remove("data") {
        Some(Value::Object(data)) => data,
        _ => Map::new(),
    };
    Ok(DecodedUplink {
        data,
        warnings,
        normalized,
    })
}

fn parse_encoded(value: CelValue) -> Result<EncodedDownlink> {
    let map = match &value {
        CelValue::Map(map) => map,
        other => {
            return Ok(EncodedDownlink {
                bytes: cel_value_to_bytes(other)?,
                ..Default::default()
            })
        }
    };
    let bytes = map
        .map
        .iter()
        .find(|(key, _)| matches!(key, Key::String(s) if s.as_str() == "bytes"))
        .map(|(_, v)| cel_value_to_bytes(v))
        .transpose()?
        .ok_or_else(|| PayloadError::InvalidOutput("encoder result has no `bytes`".to_string()))?;

    let object = match cel_value_to_json(value)? {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    check_errors(&object)?;
    let f_port = match object.get("f_port").and_then(Value::as_u64) {
        Some(port) => Some(u32::try_from(port).map_err(|_| {
            PayloadError::InvalidOutput(format!("invalid f_port {}", port))
        })?),
        None => None,
    };
    Ok(EncodedDownlink {
        bytes,
        f_port,
        warnings: strings(object.get("warnings")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(bytes: &[u8], f_port: u32) -> ScriptInput {
        ScriptInput {
            bytes: bytes.to_vec(),
            f_port,
            version_ids: None,
        }
    }

    #[tokio::test]
    async fn test_decode_plain_object() {
        let runner = ScriptRunner::default();

        let decoded = runner
            .decode_uplink("{'sum': sum(bytes_to_ints(input))}", input(&[0xC1], 22))
            .await
            .unwrap();

        assert_eq!(Value::Object(decoded.data), json!({"sum": 193}));
        assert!(decoded.normalized.is_empty());
    }

    #[tokio::test]
    async fn test_decode_structured_result() {
        let runner = ScriptRunner::default();
        let script = "{'data': {'temp': 21}, 'warnings': ['low battery'], \
                      'normalized': [{'air': {'temperature': 21}}]}";

        let decoded = runner.decode_uplink(script, input(&[], 1)).await.unwrap();

        assert_eq!(Value::Object(decoded.data), json!({"temp": 21}));
        assert_eq!(decoded.warnings, vec!["low battery".to_string()]);
        assert_eq!(decoded.normalized.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_script_errors() {
        let runner = ScriptRunner::default();

        let err = runner
            .decode_uplink("{'data': {}, 'errors': ['unknown port']}", input(&[], 9))
            .await
            .unwrap_err();

        assert!(matches!(err, PayloadError::ScriptErrors(e) if e == vec!["unknown port".to_string()]));
    }

    #[tokio::test]
    async fn test_decode_rejects_scalar() {
        let runner = ScriptRunner::default();

        let err = runner.decode_uplink("42", input(&[], 1)).await.unwrap_err();

        assert!(matches!(err, PayloadError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn test_encode_list_of_bytes() {
        let runner = ScriptRunner::default();
        let data = json!({"level": 3}).as_object().cloned().unwrap();

        let encoded = runner
            .encode_downlink("[data.level, f_port]", data, input(&[], 7))
            .await
            .unwrap();

        assert_eq!(encoded.bytes, vec![3, 7]);
        assert_eq!(encoded.f_port, None);
    }

    #[tokio::test]
    async fn test_encode_structured_result() {
        let runner = ScriptRunner::default();

        let encoded = runner
            .encode_downlink("{'bytes': [1, 2], 'f_port': 15}", Map::new(), input(&[], 1))
            .await
            .unwrap();

        assert_eq!(encoded.bytes, vec![1, 2]);
        assert_eq!(encoded.f_port, Some(15));
    }
}
