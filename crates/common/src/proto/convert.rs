use chrono::{DateTime, TimeZone, Utc};
use prost_types::{value::Kind, FieldMask, ListValue, Struct as ProtoStruct, Timestamp, Value as ProtoValue};
use serde_json::{Map, Number, Value};

use crate::domain::{AesKey, DevAddr, DomainError, DomainResult, Eui64, Struct};

/// Convert chrono DateTime to protobuf Timestamp
pub fn datetime_to_timestamp(dt: Option<DateTime<Utc>>) -> Option<Timestamp> {
    dt.map(|d| Timestamp {
        seconds: d.timestamp(),
        nanos: d.timestamp_subsec_nanos() as i32,
    })
}

/// Convert protobuf Timestamp to chrono DateTime
pub fn timestamp_to_datetime(ts: Option<Timestamp>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| Utc.timestamp_opt(t.seconds, t.nanos.max(0) as u32).single())
}

pub fn field_mask_paths(mask: Option<FieldMask>) -> Vec<String> {
    mask.map(|m| m.paths).unwrap_or_default()
}

pub fn to_field_mask(paths: &[String]) -> Option<FieldMask> {
    Some(FieldMask {
        paths: paths.to_vec(),
    })
}

pub fn json_to_proto_value(value: Value) -> ProtoValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(map) => Kind::StructValue(struct_to_proto(map)),
    };
    ProtoValue { kind: Some(kind) }
}

pub fn proto_value_to_json(value: ProtoValue) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::NumberValue(n)) => number_to_json(n),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(proto_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(struct_from_proto(s)),
    }
}

/// Integral doubles come back as JSON integers.
fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub fn struct_to_proto(map: Struct) -> ProtoStruct {
    ProtoStruct {
        fields: map
            .into_iter()
            .map(|(k, v)| (k, json_to_proto_value(v)))
            .collect(),
    }
}

pub fn struct_from_proto(s: ProtoStruct) -> Struct {
    s.fields
        .into_iter()
        .map(|(k, v)| (k, proto_value_to_json(v)))
        .collect::<Map<String, Value>>()
}

pub fn optional_struct_to_proto(map: Option<Struct>) -> Option<ProtoStruct> {
    map.map(struct_to_proto)
}

pub fn optional_struct_from_proto(s: Option<ProtoStruct>) -> Option<Struct> {
    s.map(struct_from_proto)
}

pub fn eui_to_bytes(eui: Option<Eui64>) -> Vec<u8> {
    eui.map(|e| e.0.to_vec()).unwrap_or_default()
}

/// Empty bytes mean unset.
pub fn eui_from_bytes(bytes: &[u8]) -> DomainResult<Option<Eui64>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    Eui64::from_slice(bytes).map(Some)
}

pub fn dev_addr_to_bytes(addr: Option<DevAddr>) -> Vec<u8> {
    addr.map(|a| a.0.to_vec()).unwrap_or_default()
}

pub fn dev_addr_from_bytes(bytes: &[u8]) -> DomainResult<Option<DevAddr>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    DevAddr::from_slice(bytes).map(Some)
}

pub fn aes_key_from_bytes(bytes: &[u8]) -> DomainResult<Option<AesKey>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    AesKey::from_slice(bytes).map(Some)
}

/// Maps an out-of-range protobuf enum value to `InvalidArgument`.
pub fn unknown_enum(kind: &str, value: i32) -> DomainError {
    DomainError::InvalidArgument(format!("unknown {} `{}`", kind, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_struct_conversion_keeps_integers() {
        let Value::Object(map) = json!({"sum": 193, "ratio": 0.5, "tags": ["a"], "nested": {"ok": true}}) else {
            unreachable!()
        };

        let back = struct_from_proto(struct_to_proto(map.clone()));

        assert_eq!(back, map);
    }

    #[test]
    fn test_timestamp_conversion() {
        let now = Utc.timestamp_opt(1_700_000_000, 5).unwrap();

        assert_eq!(timestamp_to_datetime(datetime_to_timestamp(Some(now))), Some(now));
        assert_eq!(timestamp_to_datetime(None), None);
    }

    #[test]
    fn test_empty_eui_is_unset() {
        assert_eq!(eui_from_bytes(&[]).unwrap(), None);
        assert!(eui_from_bytes(&[1, 2]).is_err());
    }
}
