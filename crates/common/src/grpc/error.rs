use bytes::Bytes;
use prost::Message;
use tonic::{Code, Status};

use crate::domain::DomainError;
use crate::proto::{
    from_proto_queue_error_details, to_proto_queue_error_details,
    DownlinkQueueOperationErrorDetails,
};

/// Convert domain error to gRPC Status
pub fn domain_error_to_status(error: DomainError) -> Status {
    match error {
        DomainError::InvalidArgument(msg) => Status::invalid_argument(msg),
        DomainError::NotFound(msg) => Status::not_found(msg),
        DomainError::FailedPrecondition(msg) => Status::failed_precondition(msg),
        DomainError::Aborted(msg) => Status::aborted(msg),
        DomainError::AlreadyExists(msg) => Status::already_exists(msg),
        DomainError::PermissionDenied(msg) => Status::permission_denied(msg),
        DomainError::Unauthenticated(msg) => Status::unauthenticated(msg),
        DomainError::ResourceExhausted(msg) => Status::resource_exhausted(msg),
        DomainError::Unavailable(msg) => Status::unavailable(msg),
        DomainError::Corruption(msg) => Status::data_loss(msg),
        DomainError::DownlinkQueueOperation { message, details } => {
            let details = to_proto_queue_error_details(details).encode_to_vec();
            Status::with_details(Code::FailedPrecondition, message, Bytes::from(details))
        }
        DomainError::Internal(err) => Status::internal(format!("Internal error: {}", err)),
    }
}

/// Convert a peer's gRPC Status back into the domain taxonomy.
///
/// A `FailedPrecondition` status carrying `DownlinkQueueOperationErrorDetails`
/// becomes [`DomainError::DownlinkQueueOperation`].
pub fn status_to_domain_error(status: Status) -> DomainError {
    let message = status.message().to_string();
    match status.code() {
        Code::InvalidArgument | Code::OutOfRange => DomainError::InvalidArgument(message),
        Code::NotFound => DomainError::NotFound(message),
        Code::FailedPrecondition => match decode_queue_details(status.details()) {
            Some(details) => DomainError::DownlinkQueueOperation { message, details },
            None => DomainError::FailedPrecondition(message),
        },
        Code::Aborted => DomainError::Aborted(message),
        Code::AlreadyExists => DomainError::AlreadyExists(message),
        Code::PermissionDenied => DomainError::PermissionDenied(message),
        Code::Unauthenticated => DomainError::Unauthenticated(message),
        Code::ResourceExhausted => DomainError::ResourceExhausted(message),
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            DomainError::Unavailable(message)
        }
        Code::DataLoss => DomainError::Corruption(message),
        _ => DomainError::Internal(anyhow::anyhow!("{}: {}", status.code(), message)),
    }
}

fn decode_queue_details(
    raw: &[u8],
) -> Option<crate::domain::DownlinkQueueOperationErrorDetails> {
    if raw.is_empty() {
        return None;
    }
    let details = DownlinkQueueOperationErrorDetails::decode(raw).ok()?;
    from_proto_queue_error_details(details).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DevAddr, DownlinkQueueOperationErrorDetails, SessionErrorDetails};

    #[test]
    fn test_queue_details_survive_status() {
        let details = DownlinkQueueOperationErrorDetails {
            current: Some(SessionErrorDetails {
                session_key_id: vec![0x33],
                dev_addr: Some(DevAddr([0x33; 4])),
                min_f_cnt_down: 3,
            }),
            pending: None,
        };
        let status = domain_error_to_status(DomainError::DownlinkQueueOperation {
            message: "f_cnt_too_low".to_string(),
            details: details.clone(),
        });

        assert_eq!(status.code(), Code::FailedPrecondition);

        let err = status_to_domain_error(status);
        assert_eq!(err.downlink_queue_details(), Some(&details));
        assert_eq!(err.name(), "f_cnt_too_low");
    }

    #[test]
    fn test_plain_failed_precondition() {
        let err = status_to_domain_error(Status::failed_precondition("no_device_session"));

        assert!(matches!(err, DomainError::FailedPrecondition(_)));
    }

    #[test]
    fn test_codes_map_to_taxonomy() {
        assert!(status_to_domain_error(Status::not_found("device")).is_not_found());
        assert!(status_to_domain_error(Status::unavailable("js")).is_unavailable());
        assert_eq!(
            domain_error_to_status(DomainError::Aborted("webhook_disabled".to_string())).code(),
            Code::Aborted
        );
        assert_eq!(
            domain_error_to_status(DomainError::Corruption("no_app_s_key".to_string())).code(),
            Code::DataLoss
        );
    }
}
