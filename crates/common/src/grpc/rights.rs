use tonic::{Request, Status};

use super::domain_error_to_status;
use crate::auth::{authorize_application, metadata_authorization, AuthInfo, Right, RightsFetcher};
use crate::domain::ApplicationIdentifiers;

/// Checks that the caller of `request` holds `rights` on the application.
pub async fn require_rights<T>(
    fetcher: &dyn RightsFetcher,
    request: &Request<T>,
    ids: &ApplicationIdentifiers,
    rights: &[Right],
) -> Result<AuthInfo, Status> {
    authorize_application(
        fetcher,
        metadata_authorization(request.metadata()),
        ids,
        rights,
    )
    .await
    .map_err(domain_error_to_status)
}
