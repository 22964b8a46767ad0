use common::domain::{
    field_mask, ApplicationIdentifiers, ApplicationLink, DomainError, DomainResult,
    MessagePayloadFormatters, LINK_FIELD_PATHS,
};
use common::registry::{LinkRegistry, Mutation};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH: usize = 40 * 1024;

/// Rejects formatter parameters longer than `max` bytes.
pub fn validate_formatters(formatters: &MessagePayloadFormatters, max: usize) -> DomainResult<()> {
    for (name, parameter) in [
        ("up_formatter_parameter", &formatters.up_formatter_parameter),
        ("down_formatter_parameter", &formatters.down_formatter_parameter),
    ] {
        if parameter.len() > max {
            return Err(DomainError::InvalidArgument(format!(
                "{} exceeds {} bytes",
                name, max
            )));
        }
    }
    Ok(())
}

/// Application link settings and the formatter policy of this server.
pub struct LinkService {
    links: Arc<dyn LinkRegistry>,
    default_link: ApplicationLink,
    formatter_max_parameter_length: usize,
}

impl LinkService {
    pub fn new(
        links: Arc<dyn LinkRegistry>,
        default_link: ApplicationLink,
        formatter_max_parameter_length: usize,
    ) -> Self {
        Self {
            links,
            default_link,
            formatter_max_parameter_length,
        }
    }

    pub fn formatter_max_parameter_length(&self) -> usize {
        self.formatter_max_parameter_length
    }

    /// The stored link, or the configured default when the application has
    /// none.
    #[instrument(skip(self, paths), fields(application_id = %ids.application_id))]
    pub async fn get_link(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationLink> {
        ids.validate()?;
        field_mask::validate_paths(paths, LINK_FIELD_PATHS)?;

        match self.links.get(ids, paths).await {
            Ok(link) => Ok(link),
            Err(DomainError::NotFound(_)) => {
                debug!("no link stored, using default");
                Ok(self.default_link.masked(paths))
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, link, paths), fields(application_id = %ids.application_id))]
    pub async fn set_link(
        &self,
        ids: &ApplicationIdentifiers,
        link: ApplicationLink,
        paths: &[String],
    ) -> DomainResult<ApplicationLink> {
        ids.validate()?;
        if paths.is_empty() {
            return Err(DomainError::InvalidArgument(
                "field mask must not be empty".to_string(),
            ));
        }
        field_mask::validate_paths(paths, LINK_FIELD_PATHS)?;
        if field_mask::has_path(paths, "default_formatters") {
            if let Some(formatters) = &link.default_formatters {
                validate_formatters(formatters, self.formatter_max_parameter_length)?;
            }
        }

        let write_paths = paths.to_vec();
        let stored = self
            .links
            .set(
                ids,
                paths,
                Box::new(move |_| {
                    Ok(Mutation::Write {
                        value: link,
                        paths: write_paths,
                    })
                }),
            )
            .await?
            .ok_or_else(|| DomainError::Internal(anyhow::anyhow!("link write returned nothing")))?;

        info!("application link updated");
        Ok(stored.masked(paths))
    }

    #[instrument(skip(self), fields(application_id = %ids.application_id))]
    pub async fn delete_link(&self, ids: &ApplicationIdentifiers) -> DomainResult<()> {
        ids.validate()?;
        self.links
            .set(ids, &[], Box::new(|_| Ok(Mutation::Delete)))
            .await?;
        info!("application link deleted");
        Ok(())
    }
}
