use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use super::{unwrap_key, wrap_key};
use crate::domain::{AesKey, DomainError, DomainResult, KeyEnvelope};

/// Wraps and unwraps keys with KEKs identified by label.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait KeyVault: Send + Sync {
    async fn wrap(&self, plaintext: &[u8], kek_label: &str) -> DomainResult<Vec<u8>>;

    /// Returns `NotFound` when the KEK label is unknown to this vault.
    async fn unwrap(&self, ciphertext: &[u8], kek_label: &str) -> DomainResult<Vec<u8>>;
}

/// Key vault backed by KEKs held in memory, loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct MemKeyVault {
    keks: HashMap<String, AesKey>,
}

impl MemKeyVault {
    pub fn new(keks: HashMap<String, AesKey>) -> Self {
        Self { keks }
    }

    fn kek(&self, label: &str) -> DomainResult<&AesKey> {
        self.keks
            .get(label)
            .ok_or_else(|| DomainError::NotFound(format!("kek `{}`", label)))
    }
}

#[async_trait]
impl KeyVault for MemKeyVault {
    async fn wrap(&self, plaintext: &[u8], kek_label: &str) -> DomainResult<Vec<u8>> {
        wrap_key(self.kek(kek_label)?, plaintext)
    }

    async fn unwrap(&self, ciphertext: &[u8], kek_label: &str) -> DomainResult<Vec<u8>> {
        unwrap_key(self.kek(kek_label)?, ciphertext)
    }
}

/// Resolves the cleartext key from an envelope.
///
/// Returns `Ok(None)` when the key is wrapped with a KEK this vault does not
/// hold, and `Corruption` when the envelope carries no key at all.
pub async fn unwrap_key_envelope(
    vault: &dyn KeyVault,
    envelope: &KeyEnvelope,
) -> DomainResult<Option<AesKey>> {
    if let Some(key) = envelope.key {
        return Ok(Some(key));
    }
    if envelope.encrypted_key.is_empty() {
        return Err(DomainError::Corruption("no_app_s_key".to_string()));
    }
    match vault
        .unwrap(&envelope.encrypted_key, &envelope.kek_label)
        .await
    {
        Ok(plain) => Ok(Some(AesKey::from_slice(&plain).map_err(|_| {
            DomainError::Corruption("unwrapped key has invalid length".to_string())
        })?)),
        Err(DomainError::NotFound(_)) => {
            debug!(kek_label = %envelope.kek_label, "kek not available, key stays wrapped");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Wraps a cleartext key with the given KEK. An empty label stores the key
/// in the clear.
pub async fn wrap_key_envelope(
    vault: &dyn KeyVault,
    key: &AesKey,
    kek_label: &str,
) -> DomainResult<KeyEnvelope> {
    if kek_label.is_empty() {
        return Ok(KeyEnvelope::plain(*key));
    }
    let encrypted = vault.wrap(&key.0, kek_label).await?;
    Ok(KeyEnvelope::wrapped(kek_label, encrypted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> MemKeyVault {
        let mut keks = HashMap::new();
        keks.insert("as-kek".to_string(), AesKey([0x0f; 16]));
        MemKeyVault::new(keks)
    }

    #[tokio::test]
    async fn test_wrap_unwrap_envelope() {
        let vault = vault();
        let key = AesKey([0x22; 16]);

        let envelope = wrap_key_envelope(&vault, &key, "as-kek").await.unwrap();
        assert!(envelope.is_wrapped());

        let unwrapped = unwrap_key_envelope(&vault, &envelope).await.unwrap();
        assert_eq!(unwrapped, Some(key));
    }

    #[tokio::test]
    async fn test_unknown_kek_stays_wrapped() {
        let envelope = KeyEnvelope::wrapped("other-kek", vec![0u8; 24]);

        let result = unwrap_key_envelope(&vault(), &envelope).await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_empty_envelope_is_corruption() {
        let result = unwrap_key_envelope(&vault(), &KeyEnvelope::default()).await;
        assert!(matches!(result, Err(DomainError::Corruption(_))));
    }

    #[tokio::test]
    async fn test_vault_errors_propagate() {
        let mut mock = MockKeyVault::new();
        mock.expect_unwrap()
            .times(1)
            .return_once(|_, _| Err(DomainError::Unavailable("hsm".to_string())));

        let envelope = KeyEnvelope::wrapped("as-kek", vec![0u8; 24]);
        let result = unwrap_key_envelope(&mock, &envelope).await;

        assert!(matches!(result, Err(DomainError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_plain_wrap_without_label() {
        let envelope = wrap_key_envelope(&vault(), &AesKey([1; 16]), "")
            .await
            .unwrap();
        assert_eq!(envelope.key, Some(AesKey([1; 16])));
    }
}
