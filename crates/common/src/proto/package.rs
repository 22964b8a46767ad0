use prost_types::{FieldMask, Struct as ProtoStruct, Timestamp};

use super::convert::{
    datetime_to_timestamp, optional_struct_from_proto, optional_struct_to_proto,
    timestamp_to_datetime,
};
use super::identifiers::{
    from_proto_application_ids, from_proto_end_device_ids, to_proto_application_ids,
    to_proto_end_device_ids, ApplicationIdentifiers, EndDeviceIdentifiers,
};
use crate::domain::{self, DomainError, DomainResult};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackage {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub default_f_port: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackages {
    #[prost(message, repeated, tag = "1")]
    pub packages: Vec<ApplicationPackage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackageAssociationIdentifiers {
    #[prost(message, optional, tag = "1")]
    pub end_device_ids: Option<EndDeviceIdentifiers>,
    #[prost(uint32, tag = "2")]
    pub f_port: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackageAssociation {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationPackageAssociationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub created_at: Option<Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub updated_at: Option<Timestamp>,
    #[prost(string, tag = "4")]
    pub package_name: String,
    #[prost(message, optional, tag = "5")]
    pub data: Option<ProtoStruct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackageAssociations {
    #[prost(message, repeated, tag = "1")]
    pub associations: Vec<ApplicationPackageAssociation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetApplicationPackageAssociationRequest {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationPackageAssociationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListApplicationPackageAssociationRequest {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<EndDeviceIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetApplicationPackageAssociationRequest {
    #[prost(message, optional, tag = "1")]
    pub association: Option<ApplicationPackageAssociation>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackageDefaultAssociationIdentifiers {
    #[prost(message, optional, tag = "1")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(uint32, tag = "2")]
    pub f_port: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackageDefaultAssociation {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationPackageDefaultAssociationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub created_at: Option<Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub updated_at: Option<Timestamp>,
    #[prost(string, tag = "4")]
    pub package_name: String,
    #[prost(message, optional, tag = "5")]
    pub data: Option<ProtoStruct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPackageDefaultAssociations {
    #[prost(message, repeated, tag = "1")]
    pub defaults: Vec<ApplicationPackageDefaultAssociation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetApplicationPackageDefaultAssociationRequest {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationPackageDefaultAssociationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListApplicationPackageDefaultAssociationRequest {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<ApplicationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetApplicationPackageDefaultAssociationRequest {
    #[prost(message, optional, tag = "1")]
    pub default: Option<ApplicationPackageDefaultAssociation>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

pub fn to_proto_package(p: domain::ApplicationPackage) -> ApplicationPackage {
    ApplicationPackage {
        name: p.name,
        default_f_port: p.default_f_port,
    }
}

fn validate_f_port(f_port: u32) -> DomainResult<()> {
    if (1..=255).contains(&f_port) {
        Ok(())
    } else {
        Err(DomainError::InvalidArgument(format!(
            "invalid f_port `{}`",
            f_port
        )))
    }
}

pub fn to_proto_association_ids(
    ids: domain::ApplicationPackageAssociationIdentifiers,
) -> ApplicationPackageAssociationIdentifiers {
    ApplicationPackageAssociationIdentifiers {
        end_device_ids: Some(to_proto_end_device_ids(ids.end_device_ids)),
        f_port: ids.f_port,
    }
}

pub fn from_proto_association_ids(
    ids: Option<ApplicationPackageAssociationIdentifiers>,
) -> DomainResult<domain::ApplicationPackageAssociationIdentifiers> {
    let ids = ids.ok_or_else(|| {
        DomainError::InvalidArgument("missing association identifiers".to_string())
    })?;
    validate_f_port(ids.f_port)?;
    Ok(domain::ApplicationPackageAssociationIdentifiers {
        end_device_ids: from_proto_end_device_ids(ids.end_device_ids)?,
        f_port: ids.f_port,
    })
}

pub fn to_proto_default_association_ids(
    ids: domain::ApplicationPackageDefaultAssociationIdentifiers,
) -> ApplicationPackageDefaultAssociationIdentifiers {
    ApplicationPackageDefaultAssociationIdentifiers {
        application_ids: Some(to_proto_application_ids(ids.application_ids)),
        f_port: ids.f_port,
    }
}

pub fn from_proto_default_association_ids(
    ids: Option<ApplicationPackageDefaultAssociationIdentifiers>,
) -> DomainResult<domain::ApplicationPackageDefaultAssociationIdentifiers> {
    let ids = ids.ok_or_else(|| {
        DomainError::InvalidArgument("missing default association identifiers".to_string())
    })?;
    validate_f_port(ids.f_port)?;
    Ok(domain::ApplicationPackageDefaultAssociationIdentifiers {
        application_ids: from_proto_application_ids(ids.application_ids)?,
        f_port: ids.f_port,
    })
}

pub fn to_proto_association(
    a: domain::ApplicationPackageAssociation,
) -> ApplicationPackageAssociation {
    ApplicationPackageAssociation {
        ids: Some(to_proto_association_ids(a.ids)),
        created_at: datetime_to_timestamp(a.created_at),
        updated_at: datetime_to_timestamp(a.updated_at),
        package_name: a.package_name,
        data: optional_struct_to_proto(a.data),
    }
}

pub fn from_proto_association(
    a: ApplicationPackageAssociation,
) -> DomainResult<domain::ApplicationPackageAssociation> {
    Ok(domain::ApplicationPackageAssociation {
        ids: from_proto_association_ids(a.ids)?,
        package_name: a.package_name,
        data: optional_struct_from_proto(a.data),
        created_at: timestamp_to_datetime(a.created_at),
        updated_at: timestamp_to_datetime(a.updated_at),
    })
}

pub fn to_proto_default_association(
    a: domain::ApplicationPackageDefaultAssociation,
) -> ApplicationPackageDefaultAssociation {
    ApplicationPackageDefaultAssociation {
        ids: Some(to_proto_default_association_ids(a.ids)),
        created_at: datetime_to_timestamp(a.created_at),
        updated_at: datetime_to_timestamp(a.updated_at),
        package_name: a.package_name,
        data: optional_struct_to_proto(a.data),
    }
}

pub fn from_proto_default_association(
    a: ApplicationPackageDefaultAssociation,
) -> DomainResult<domain::ApplicationPackageDefaultAssociation> {
    Ok(domain::ApplicationPackageDefaultAssociation {
        ids: from_proto_default_association_ids(a.ids)?,
        package_name: a.package_name,
        data: optional_struct_from_proto(a.data),
        created_at: timestamp_to_datetime(a.created_at),
        updated_at: timestamp_to_datetime(a.updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_f_port_validated() {
        let ids = ApplicationPackageAssociationIdentifiers {
            end_device_ids: Some(to_proto_end_device_ids(domain::EndDeviceIdentifiers::new(
                "foo-app",
                "foo-device",
            ))),
            f_port: 0,
        };

        assert!(from_proto_association_ids(Some(ids.clone())).is_err());

        let ids = ApplicationPackageAssociationIdentifiers { f_port: 200, ..ids };
        let parsed = from_proto_association_ids(Some(ids)).unwrap();
        assert_eq!(parsed.unique_id(), "foo-app.foo-device.200");
    }
}
