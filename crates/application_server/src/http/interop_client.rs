use async_trait::async_trait;
use common::domain::{AesKey, DomainError, DomainResult, Eui64, KeyEnvelope};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::{JoinServer, SessionKeyRequest};

const PROTOCOL_VERSION: &str = "1.1";

#[derive(Debug, Clone)]
pub struct InteropClientConfig {
    /// Join Server endpoint accepting backend interfaces messages.
    pub url: String,
    /// Sent as `SenderID`.
    pub as_id: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AppSKeyReq {
    protocol_version: &'static str,
    #[serde(rename = "SenderID")]
    sender_id: String,
    #[serde(rename = "ReceiverID")]
    receiver_id: String,
    message_type: &'static str,
    #[serde(rename = "TransactionID")]
    transaction_id: u32,
    #[serde(rename = "DevEUI")]
    dev_eui: String,
    #[serde(rename = "SessionKeyID")]
    session_key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InteropResult {
    result_code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyEnvelopeAns {
    #[serde(rename = "KEKLabel", default)]
    kek_label: String,
    #[serde(rename = "AESKey")]
    aes_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AppSKeyAns {
    result: InteropResult,
    #[serde(rename = "AppSKey")]
    app_s_key: Option<KeyEnvelopeAns>,
}

fn hex_eui(eui: Option<Eui64>) -> String {
    eui.map(|e| e.to_string()).unwrap_or_default()
}

fn build_request(as_id: &str, request: &SessionKeyRequest, transaction_id: u32) -> AppSKeyReq {
    AppSKeyReq {
        protocol_version: PROTOCOL_VERSION,
        sender_id: as_id.to_string(),
        receiver_id: hex_eui(request.join_eui),
        message_type: "AppSKeyReq",
        transaction_id,
        dev_eui: hex_eui(request.dev_eui),
        session_key_id: hex::encode_upper(&request.session_key_id),
    }
}

/// Maps an answer to a key envelope. Keys without a KEK label travel in the
/// clear.
fn parse_answer(answer: AppSKeyAns) -> DomainResult<KeyEnvelope> {
    match answer.result.result_code.as_str() {
        "Success" => {}
        "UnknownDevEUI" | "UnknownSessionKeyID" | "UnknownJoinEUI" => {
            return Err(DomainError::NotFound(format!(
                "interop {}: {}",
                answer.result.result_code, answer.result.description
            )))
        }
        code => {
            return Err(DomainError::Unavailable(format!(
                "interop {}: {}",
                code, answer.result.description
            )))
        }
    }
    let key = answer
        .app_s_key
        .ok_or_else(|| DomainError::NotFound("interop answer without AppSKey".to_string()))?;
    let bytes = hex::decode(&key.aes_key)
        .map_err(|e| DomainError::Unavailable(format!("invalid interop AppSKey: {}", e)))?;
    if key.kek_label.is_empty() {
        Ok(KeyEnvelope::plain(AesKey::from_slice(&bytes)?))
    } else {
        Ok(KeyEnvelope::wrapped(key.kek_label, bytes))
    }
}

/// Join Server outside the cluster, reached over the LoRaWAN backend
/// interfaces JSON API.
pub struct InteropClient {
    client: reqwest::Client,
    config: InteropClientConfig,
}

impl InteropClient {
    pub fn new(config: InteropClientConfig) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::Internal(e.into()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl JoinServer for InteropClient {
    #[instrument(skip(self, request), fields(url = %self.config.url, session_key_id = %hex::encode(&request.session_key_id)))]
    async fn get_app_s_key(&self, request: &SessionKeyRequest) -> DomainResult<KeyEnvelope> {
        let body = build_request(&self.config.as_id, request, rand_transaction_id());
        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Unavailable(format!("interop request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(DomainError::Unavailable(format!(
                "interop join server returned {}",
                response.status()
            )));
        }
        let answer: AppSKeyAns = response
            .json()
            .await
            .map_err(|e| DomainError::Unavailable(format!("invalid interop answer: {}", e)))?;
        debug!(result = %answer.result.result_code, "interop answer received");
        parse_answer(answer)
    }
}

fn rand_transaction_id() -> u32 {
    let (_, low) = uuid::Uuid::new_v4().as_u64_pair();
    low as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answer(value: serde_json::Value) -> AppSKeyAns {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_encoding() {
        let request = SessionKeyRequest {
            session_key_id: vec![0xab, 0xcd],
            dev_eui: Some(Eui64([0x11; 8])),
            join_eui: Some(Eui64([0x22; 8])),
        };

        let encoded = serde_json::to_value(build_request("as.example", &request, 7)).unwrap();

        assert_eq!(encoded["MessageType"], "AppSKeyReq");
        assert_eq!(encoded["SenderID"], "as.example");
        assert_eq!(encoded["ReceiverID"], "2222222222222222");
        assert_eq!(encoded["DevEUI"], "1111111111111111");
        assert_eq!(encoded["SessionKeyID"], "ABCD");
        assert_eq!(encoded["TransactionID"], 7);
    }

    #[test]
    fn test_plain_key_answer() {
        let envelope = parse_answer(answer(json!({
            "Result": {"ResultCode": "Success"},
            "AppSKey": {"AESKey": "33333333333333333333333333333333"}
        })))
        .unwrap();

        assert_eq!(envelope, KeyEnvelope::plain(AesKey([0x33; 16])));
    }

    #[test]
    fn test_wrapped_key_answer() {
        let envelope = parse_answer(answer(json!({
            "Result": {"ResultCode": "Success"},
            "AppSKey": {"KEKLabel": "as-kek", "AESKey": "0102"}
        })))
        .unwrap();

        assert_eq!(envelope.kek_label, "as-kek");
        assert_eq!(envelope.encrypted_key, vec![1, 2]);
    }

    #[test]
    fn test_unknown_device_is_not_found() {
        let result = parse_answer(answer(json!({
            "Result": {"ResultCode": "UnknownDevEUI", "Description": "no such device"}
        })));

        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn test_other_failures_are_unavailable() {
        let result = parse_answer(answer(json!({"Result": {"ResultCode": "Other"}})));

        assert!(matches!(result, Err(DomainError::Unavailable(_))));
    }
}
