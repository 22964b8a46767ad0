//! In-memory Network Server used by integration tests.

use async_trait::async_trait;
use common::domain::{
    ApplicationDownlink, DevAddr, DomainError, DomainResult, DownlinkQueueOperationErrorDetails,
    EndDeviceIdentifiers, SessionErrorDetails,
};
use dashmap::DashMap;

use crate::domain::NetworkServer;

/// Network Server view of one session.
#[derive(Debug, Clone, Default)]
pub struct NsSession {
    pub session_key_id: Vec<u8>,
    pub dev_addr: DevAddr,
    /// Last frame counter transmitted to the device.
    pub last_f_cnt_down: u32,
    pub queue: Vec<ApplicationDownlink>,
}

impl NsSession {
    pub fn new(session_key_id: Vec<u8>, dev_addr: DevAddr, last_f_cnt_down: u32) -> Self {
        Self {
            session_key_id,
            dev_addr,
            last_f_cnt_down,
            queue: Vec::new(),
        }
    }

    fn min_f_cnt_down(&self) -> u32 {
        let queued = self.queue.last().map(|d| d.f_cnt).unwrap_or(0);
        self.last_f_cnt_down.max(queued) + 1
    }

    fn details(&self) -> SessionErrorDetails {
        SessionErrorDetails {
            session_key_id: self.session_key_id.clone(),
            dev_addr: Some(self.dev_addr),
            min_f_cnt_down: self.min_f_cnt_down(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NsDevice {
    current: Option<NsSession>,
    pending: Option<NsSession>,
}

impl NsDevice {
    fn session_mut(&mut self, session_key_id: &[u8]) -> Option<&mut NsSession> {
        [self.current.as_mut(), self.pending.as_mut()]
            .into_iter()
            .flatten()
            .find(|s| s.session_key_id == session_key_id)
    }

    fn rejection(&self) -> DomainError {
        DomainError::DownlinkQueueOperation {
            message: "f_cnt too low".to_string(),
            details: DownlinkQueueOperationErrorDetails {
                current: self.current.as_ref().map(NsSession::details),
                pending: self.pending.as_ref().map(NsSession::details),
            },
        }
    }

    /// Appends `downlinks` to `base`, enforcing increasing frame counters per
    /// session.
    fn enqueue(base: &NsDevice, downlinks: Vec<ApplicationDownlink>) -> DomainResult<NsDevice> {
        let mut staged = base.clone();
        for downlink in downlinks {
            let Some(session) = staged.session_mut(&downlink.session_key_id) else {
                return Err(base.rejection());
            };
            if downlink.f_cnt < session.min_f_cnt_down() {
                return Err(base.rejection());
            }
            session.queue.push(downlink);
        }
        Ok(staged)
    }
}

/// Network Server holding per-session downlink queues and rejecting frame
/// counters it already used, the way a real one does.
#[derive(Default)]
pub struct InMemoryNetworkServer {
    devices: DashMap<String, NsDevice>,
}

impl InMemoryNetworkServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sessions(
        &self,
        ids: &EndDeviceIdentifiers,
        current: Option<NsSession>,
        pending: Option<NsSession>,
    ) {
        self.devices
            .insert(ids.unique_id(), NsDevice { current, pending });
    }

    /// Items queued for the session identified by `session_key_id`.
    pub fn queue(&self, ids: &EndDeviceIdentifiers, session_key_id: &[u8]) -> Vec<ApplicationDownlink> {
        self.devices
            .get_mut(&ids.unique_id())
            .and_then(|mut device| device.session_mut(session_key_id).map(|s| s.queue.clone()))
            .unwrap_or_default()
    }

    fn device(&self, ids: &EndDeviceIdentifiers) -> DomainResult<NsDevice> {
        self.devices
            .get(&ids.unique_id())
            .map(|d| d.clone())
            .ok_or_else(|| DomainError::NotFound(format!("end device `{}`", ids.unique_id())))
    }
}

#[async_trait]
impl NetworkServer for InMemoryNetworkServer {
    async fn downlink_queue_push(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()> {
        let device = self.device(ids)?;
        let staged = NsDevice::enqueue(&device, downlinks)?;
        self.devices.insert(ids.unique_id(), staged);
        Ok(())
    }

    async fn downlink_queue_replace(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()> {
        let mut device = self.device(ids)?;
        for session in [device.current.as_mut(), device.pending.as_mut()]
            .into_iter()
            .flatten()
        {
            session.queue.clear();
        }
        let staged = NsDevice::enqueue(&device, downlinks)?;
        self.devices.insert(ids.unique_id(), staged);
        Ok(())
    }

    async fn downlink_queue_list(
        &self,
        ids: &EndDeviceIdentifiers,
    ) -> DomainResult<Vec<ApplicationDownlink>> {
        let device = self.device(ids)?;
        Ok([device.current, device.pending]
            .into_iter()
            .flatten()
            .flat_map(|s| s.queue)
            .collect())
    }
}
