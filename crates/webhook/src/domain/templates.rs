use common::domain::{DomainError, DomainResult, WebhookTemplate};
use std::collections::BTreeMap;
use tracing::info;

/// Read-only set of webhook templates, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, WebhookTemplate>,
}

impl TemplateStore {
    pub fn new(templates: Vec<WebhookTemplate>) -> DomainResult<Self> {
        let mut by_id = BTreeMap::new();
        for template in templates {
            if template.template_id.is_empty() {
                return Err(DomainError::InvalidArgument(
                    "webhook template without template_id".to_string(),
                ));
            }
            if by_id.insert(template.template_id.clone(), template).is_some() {
                return Err(DomainError::AlreadyExists(
                    "duplicate webhook template".to_string(),
                ));
            }
        }
        info!(count = by_id.len(), "webhook templates loaded");
        Ok(Self { templates: by_id })
    }

    /// Parses a JSON array of templates.
    pub fn from_json(data: &[u8]) -> DomainResult<Self> {
        let templates: Vec<WebhookTemplate> = serde_json::from_slice(data).map_err(|e| {
            DomainError::InvalidArgument(format!("invalid webhook templates: {}", e))
        })?;
        Self::new(templates)
    }

    pub fn get(&self, template_id: &str) -> DomainResult<WebhookTemplate> {
        self.templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("webhook template `{}`", template_id)))
    }

    /// All templates, ordered by id.
    pub fn list(&self) -> Vec<WebhookTemplate> {
        self.templates.values().cloned().collect()
    }
}
