use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApplicationIdentifiers, EndDeviceIdentifiers, Struct};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ApplicationPackageAssociationIdentifiers {
    pub end_device_ids: EndDeviceIdentifiers,
    pub f_port: u32,
}

impl ApplicationPackageAssociationIdentifiers {
    pub fn unique_id(&self) -> String {
        format!("{}.{}", self.end_device_ids.unique_id(), self.f_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ApplicationPackageDefaultAssociationIdentifiers {
    pub application_ids: ApplicationIdentifiers,
    pub f_port: u32,
}

impl ApplicationPackageDefaultAssociationIdentifiers {
    pub fn unique_id(&self) -> String {
        format!("{}.{}", self.application_ids.unique_id(), self.f_port)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationPackage {
    pub name: String,
    pub default_f_port: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationPackageAssociation {
    pub ids: ApplicationPackageAssociationIdentifiers,
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Struct>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationPackageDefaultAssociation {
    pub ids: ApplicationPackageDefaultAssociationIdentifiers,
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Struct>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

pub const PACKAGE_ASSOCIATION_FIELD_PATHS: &[&str] = &["ids", "package_name", "data"];

macro_rules! association_fields {
    ($ty:ty) => {
        impl $ty {
            pub fn masked(&self, paths: &[String]) -> Self {
                if paths.is_empty() {
                    return self.clone();
                }
                let mut out = Self {
                    ids: self.ids.clone(),
                    created_at: self.created_at,
                    updated_at: self.updated_at,
                    ..Default::default()
                };
                out.set_fields(self, paths);
                out
            }

            pub fn set_fields(&mut self, src: &Self, paths: &[String]) {
                if super::field_mask::has_path(paths, "package_name") {
                    self.package_name = src.package_name.clone();
                }
                if super::field_mask::has_path(paths, "data") {
                    self.data = src.data.clone();
                }
            }
        }
    };
}

association_fields!(ApplicationPackageAssociation);
association_fields!(ApplicationPackageDefaultAssociation);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_unique_id() {
        let ids = ApplicationPackageAssociationIdentifiers {
            end_device_ids: EndDeviceIdentifiers::new("app", "dev"),
            f_port: 200,
        };
        assert_eq!(ids.unique_id(), "app.dev.200");
    }

    #[test]
    fn test_association_masked() {
        let assoc = ApplicationPackageAssociation {
            package_name: "lora-cloud".to_string(),
            data: Some(Struct::new()),
            ..Default::default()
        };
        let masked = assoc.masked(&["package_name".to_string()]);
        assert_eq!(masked.package_name, "lora-cloud");
        assert!(masked.data.is_none());
    }
}
