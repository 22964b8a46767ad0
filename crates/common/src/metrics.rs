use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Cause attached to a drop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropCause {
    DecodeFail,
    EncodeFail,
    DecryptFail,
    InvalidatedDownlinkUnknownSession,
    PoolFull,
    SubscriberOverflow,
    WebhookFailed,
    UpstreamHandlerFailed,
}

impl DropCause {
    pub const ALL: [DropCause; 8] = [
        DropCause::DecodeFail,
        DropCause::EncodeFail,
        DropCause::DecryptFail,
        DropCause::InvalidatedDownlinkUnknownSession,
        DropCause::PoolFull,
        DropCause::SubscriberOverflow,
        DropCause::WebhookFailed,
        DropCause::UpstreamHandlerFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropCause::DecodeFail => "decode_fail",
            DropCause::EncodeFail => "encode_fail",
            DropCause::DecryptFail => "decrypt_fail",
            DropCause::InvalidatedDownlinkUnknownSession => "invalidated_downlink_unknown_session",
            DropCause::PoolFull => "pool_full",
            DropCause::SubscriberOverflow => "subscriber_overflow",
            DropCause::WebhookFailed => "webhook_failed",
            DropCause::UpstreamHandlerFailed => "upstream_handler_failed",
        }
    }
}

/// Process-wide counters, created once at startup and shared by handle.
#[derive(Debug)]
pub struct AsMetrics {
    drops: HashMap<DropCause, AtomicU64>,
    uplinks_received: AtomicU64,
    uplinks_forwarded: AtomicU64,
    downlinks_pushed: AtomicU64,
}

pub type SharedMetrics = Arc<AsMetrics>;

impl AsMetrics {
    pub fn new() -> Self {
        Self {
            drops: DropCause::ALL
                .iter()
                .map(|cause| (*cause, AtomicU64::new(0)))
                .collect(),
            uplinks_received: AtomicU64::new(0),
            uplinks_forwarded: AtomicU64::new(0),
            downlinks_pushed: AtomicU64::new(0),
        }
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(Self::new())
    }

    /// Records an observable drop event.
    pub fn record_drop(&self, cause: DropCause, reason: &str) {
        if let Some(counter) = self.drops.get(&cause) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        warn!(cause = cause.as_str(), reason = %reason, "message dropped");
    }

    pub fn drops(&self, cause: DropCause) -> u64 {
        self.drops
            .get(&cause)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn inc_uplinks_received(&self) {
        self.uplinks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_uplinks_forwarded(&self) {
        self.uplinks_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_downlinks_pushed(&self, count: u64) {
        self.downlinks_pushed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn uplinks_received(&self) -> u64 {
        self.uplinks_received.load(Ordering::Relaxed)
    }

    pub fn uplinks_forwarded(&self) -> u64 {
        self.uplinks_forwarded.load(Ordering::Relaxed)
    }

    pub fn downlinks_pushed(&self) -> u64 {
        self.downlinks_pushed.load(Ordering::Relaxed)
    }
}

impl Default for AsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_drop_counts_per_cause() {
        let metrics = AsMetrics::new();

        metrics.record_drop(DropCause::DecodeFail, "bad script");
        metrics.record_drop(DropCause::DecodeFail, "bad script");
        metrics.record_drop(DropCause::PoolFull, "pool full");

        assert_eq!(metrics.drops(DropCause::DecodeFail), 2);
        assert_eq!(metrics.drops(DropCause::PoolFull), 1);
        assert_eq!(metrics.drops(DropCause::EncodeFail), 0);
    }
}
