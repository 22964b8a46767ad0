use common::domain::{DevAddr, DomainResult, EndDevice, KeyEnvelope, Session};
use std::sync::Arc;
use tracing::{debug, info};

use super::KeyService;

/// Paths written when the session slots of a device change.
pub const SESSION_PATHS: &[&str] = &["ids.dev_addr", "session", "pending_session"];

fn session_paths() -> Vec<String> {
    SESSION_PATHS.iter().map(|p| p.to_string()).collect()
}

/// Returns the session of the device identified by `session_key_id`.
pub fn find_session<'a>(device: &'a EndDevice, session_key_id: &[u8]) -> Option<&'a Session> {
    [device.session.as_ref(), device.pending_session.as_ref()]
        .into_iter()
        .flatten()
        .find(|s| s.session_key_id() == session_key_id)
}

/// Keeps the current and pending session slots of a device consistent with
/// the traffic the Network Server reports.
///
/// Every method mutates the device in place and returns the field paths that
/// need to be written back; callers run them inside a registry transaction.
#[derive(Clone)]
pub struct SessionManager {
    keys: Arc<KeyService>,
}

impl SessionManager {
    pub fn new(keys: Arc<KeyService>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyService> {
        &self.keys
    }

    /// Makes the session identified by `session_key_id` the current one.
    pub async fn match_session(
        &self,
        device: &mut EndDevice,
        session_key_id: &[u8],
        dev_addr: Option<DevAddr>,
    ) -> DomainResult<Vec<String>> {
        if device
            .session
            .as_ref()
            .is_some_and(|s| s.session_key_id() == session_key_id)
        {
            return Ok(Vec::new());
        }

        if device
            .pending_session
            .as_ref()
            .is_some_and(|s| s.session_key_id() == session_key_id)
        {
            let promoted = device.pending_session.take();
            device.ids.dev_addr = promoted.as_ref().map(|s| s.dev_addr);
            device.session = promoted;
            info!(
                device = %device.ids.unique_id(),
                session_key_id = %hex::encode(session_key_id),
                "pending session promoted"
            );
            return Ok(session_paths());
        }

        debug!(
            device = %device.ids.unique_id(),
            session_key_id = %hex::encode(session_key_id),
            "unknown session, fetching app session key"
        );
        let envelope = self
            .keys
            .fetch_app_s_key(&device.ids, session_key_id)
            .await?;
        let dev_addr = dev_addr.or(device.ids.dev_addr).unwrap_or_default();
        device.session = Some(Session::new(dev_addr, session_key_id.to_vec(), envelope));
        device.pending_session = None;
        device.ids.dev_addr = Some(dev_addr);
        Ok(session_paths())
    }

    /// Installs the session negotiated by a join-accept in the pending slot.
    ///
    /// The AppSKey delivered with the join-accept is used when present,
    /// otherwise it is fetched. A join-accept replaying the current session
    /// leaves the device untouched.
    pub async fn install_pending(
        &self,
        device: &mut EndDevice,
        session_key_id: &[u8],
        dev_addr: Option<DevAddr>,
        app_s_key: Option<KeyEnvelope>,
    ) -> DomainResult<Vec<String>> {
        if device
            .session
            .as_ref()
            .is_some_and(|s| s.session_key_id() == session_key_id)
        {
            debug!(device = %device.ids.unique_id(), "join-accept for the current session");
            return Ok(Vec::new());
        }

        let envelope = match app_s_key {
            Some(envelope) if !envelope.is_empty() => self.keys.protect(envelope).await?,
            _ => {
                self.keys
                    .fetch_app_s_key(&device.ids, session_key_id)
                    .await?
            }
        };
        let dev_addr = dev_addr.unwrap_or_default();
        device.pending_session = Some(Session::new(dev_addr, session_key_id.to_vec(), envelope));
        Ok(vec!["pending_session".to_string()])
    }
}
