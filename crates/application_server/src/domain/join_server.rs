use async_trait::async_trait;
use common::crypto::{unwrap_key_envelope, wrap_key_envelope, KeyVault};
use common::domain::{
    skip_payload_crypto, AesKey, ApplicationLink, DomainError, DomainResult,
    EndDeviceIdentifiers, Eui64, KeyEnvelope, Session,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionKeyRequest {
    pub session_key_id: Vec<u8>,
    pub dev_eui: Option<Eui64>,
    pub join_eui: Option<Eui64>,
}

/// Source of session keys for sessions the Application Server has not seen
/// through a join-accept.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JoinServer: Send + Sync {
    /// `NotFound` when the Join Server holds no key for the session.
    async fn get_app_s_key(&self, request: &SessionKeyRequest) -> DomainResult<KeyEnvelope>;
}

#[derive(Debug, Clone, Default)]
pub struct KeyServiceConfig {
    /// KEK used to wrap keys received in the clear. Empty keeps them plain.
    pub kek_label: String,
    /// Session key IDs starting with this prefix were issued by the cluster
    /// Join Server; the interop client is never asked about them.
    pub local_session_key_id_prefix: Vec<u8>,
}

/// Resolves AppSKeys: the key vault first, then the cluster Join Server,
/// then the interop client.
pub struct KeyService {
    vault: Arc<dyn KeyVault>,
    join_server: Option<Arc<dyn JoinServer>>,
    interop: Option<Arc<dyn JoinServer>>,
    config: KeyServiceConfig,
}

impl KeyService {
    pub fn new(
        vault: Arc<dyn KeyVault>,
        join_server: Option<Arc<dyn JoinServer>>,
        interop: Option<Arc<dyn JoinServer>>,
        config: KeyServiceConfig,
    ) -> Self {
        Self {
            vault,
            join_server,
            interop,
            config,
        }
    }

    /// Cleartext AppSKey of a session. `None` when the key is wrapped with a
    /// KEK this Application Server does not hold.
    pub async fn session_key(&self, session: &Session) -> DomainResult<Option<AesKey>> {
        let envelope = session
            .keys
            .app_s_key
            .as_ref()
            .ok_or_else(|| DomainError::Corruption("no_app_s_key".to_string()))?;
        unwrap_key_envelope(self.vault.as_ref(), envelope).await
    }

    /// Payload crypto is skipped only when the session key cannot be
    /// unwrapped here and the device or link asks for it.
    pub async fn skips_payload_crypto(
        &self,
        device_override: Option<bool>,
        link: &ApplicationLink,
        session: Option<&Session>,
    ) -> DomainResult<bool> {
        if !skip_payload_crypto(device_override, link) {
            return Ok(false);
        }
        let Some(session) = session else {
            return Ok(false);
        };
        match session.keys.app_s_key.as_ref() {
            Some(envelope) => Ok(unwrap_key_envelope(self.vault.as_ref(), envelope)
                .await?
                .is_none()),
            None => Ok(false),
        }
    }

    /// Wraps keys received in the clear with the configured KEK.
    pub async fn protect(&self, envelope: KeyEnvelope) -> DomainResult<KeyEnvelope> {
        match envelope.key {
            Some(key) if !self.config.kek_label.is_empty() => {
                wrap_key_envelope(self.vault.as_ref(), &key, &self.config.kek_label).await
            }
            _ => Ok(envelope),
        }
    }

    #[instrument(skip(self, session_key_id), fields(device = %ids.unique_id(), session_key_id = %hex::encode(session_key_id)))]
    pub async fn fetch_app_s_key(
        &self,
        ids: &EndDeviceIdentifiers,
        session_key_id: &[u8],
    ) -> DomainResult<KeyEnvelope> {
        let request = SessionKeyRequest {
            session_key_id: session_key_id.to_vec(),
            dev_eui: ids.dev_eui,
            join_eui: ids.join_eui,
        };

        if let Some(join_server) = &self.join_server {
            match join_server.get_app_s_key(&request).await {
                Ok(envelope) => return self.protect(envelope).await,
                Err(e) if e.is_not_found() => debug!("session key not found on join server"),
                Err(e) => {
                    warn!(error = %e, "join server request failed");
                    return Err(e);
                }
            }
        }

        if let Some(interop) = &self.interop {
            if !self.is_local(session_key_id) {
                match interop.get_app_s_key(&request).await {
                    Ok(envelope) => return self.protect(envelope).await,
                    Err(e) => warn!(error = %e, "interop join server request failed"),
                }
            }
        }

        Err(DomainError::Unavailable("join_server_unavailable".to_string()))
    }

    fn is_local(&self, session_key_id: &[u8]) -> bool {
        let prefix = &self.config.local_session_key_id_prefix;
        !prefix.is_empty() && session_key_id.starts_with(prefix)
    }
}
