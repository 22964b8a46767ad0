use async_trait::async_trait;
use common::domain::{ApplicationDownlink, DomainResult, EndDeviceIdentifiers};

/// Downlink queue of the Network Server serving a device.
///
/// Queue operations that conflict with the Network Server's session state
/// fail with `DomainError::DownlinkQueueOperation` carrying the sessions
/// and frame counters the Network Server expects.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NetworkServer: Send + Sync {
    async fn downlink_queue_push(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()>;

    async fn downlink_queue_replace(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()>;

    async fn downlink_queue_list(
        &self,
        ids: &EndDeviceIdentifiers,
    ) -> DomainResult<Vec<ApplicationDownlink>>;
}
