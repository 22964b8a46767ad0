use thiserror::Error;

use super::DownlinkQueueOperationErrorDetails;

pub type DomainResult<T> = Result<T, DomainError>;

/// Error taxonomy shared by every Application Server component.
///
/// Each variant carries a stable tag (see [`DomainError::tag`]) that is
/// surfaced to integrations, plus a short machine-readable name.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("corruption: {0}")]
    Corruption(String),

    /// The Network Server rejected a downlink queue operation and reported the
    /// session state it expects.
    #[error("downlink queue operation rejected: {message}")]
    DownlinkQueueOperation {
        message: String,
        details: DownlinkQueueOperationErrorDetails,
    },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DomainError {
    /// Stable tag of the error class.
    pub fn tag(&self) -> &'static str {
        match self {
            DomainError::InvalidArgument(_) => "invalid_argument",
            DomainError::NotFound(_) => "not_found",
            DomainError::FailedPrecondition(_) | DomainError::DownlinkQueueOperation { .. } => {
                "failed_precondition"
            }
            DomainError::Aborted(_) => "aborted",
            DomainError::AlreadyExists(_) => "already_exists",
            DomainError::PermissionDenied(_) => "permission_denied",
            DomainError::Unauthenticated(_) => "unauthenticated",
            DomainError::ResourceExhausted(_) => "resource_exhausted",
            DomainError::Unavailable(_) => "unavailable",
            DomainError::Corruption(_) => "corruption",
            DomainError::Internal(_) => "internal",
        }
    }

    /// Short name of the specific error (e.g. `no_device_session`).
    pub fn name(&self) -> String {
        match self {
            DomainError::InvalidArgument(m)
            | DomainError::NotFound(m)
            | DomainError::FailedPrecondition(m)
            | DomainError::Aborted(m)
            | DomainError::AlreadyExists(m)
            | DomainError::PermissionDenied(m)
            | DomainError::Unauthenticated(m)
            | DomainError::ResourceExhausted(m)
            | DomainError::Unavailable(m)
            | DomainError::Corruption(m) => m.clone(),
            DomainError::DownlinkQueueOperation { message, .. } => message.clone(),
            DomainError::Internal(e) => e.to_string(),
        }
    }

    /// Error details attached by the Network Server, if any.
    pub fn downlink_queue_details(&self) -> Option<&DownlinkQueueOperationErrorDetails> {
        match self {
            DomainError::DownlinkQueueOperation { details, .. } => Some(details),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, DomainError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(
            DomainError::Aborted("rebuild".to_string()).tag(),
            "aborted"
        );
        assert_eq!(
            DomainError::ResourceExhausted("pool_full".to_string()).tag(),
            "resource_exhausted"
        );
        assert_eq!(
            DomainError::Internal(anyhow::anyhow!("boom")).tag(),
            "internal"
        );
    }

    #[test]
    fn test_downlink_queue_details_exposed() {
        let err = DomainError::DownlinkQueueOperation {
            message: "f_cnt_too_low".to_string(),
            details: DownlinkQueueOperationErrorDetails::default(),
        };

        assert!(err.downlink_queue_details().is_some());
        assert_eq!(err.tag(), "failed_precondition");
        assert!(DomainError::NotFound("x".to_string())
            .downlink_queue_details()
            .is_none());
    }
}
