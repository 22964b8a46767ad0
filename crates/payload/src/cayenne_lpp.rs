//! Cayenne Low Power Payload.
//!
//! A payload is a sequence of `channel | type | value` records. Decoded
//! fields are named `<type>_<channel>`, e.g. `temperature_1`; the encoder
//! accepts the same names.

use serde_json::{json, Map, Value};

use crate::{PayloadCodec, PayloadError, Result};

#[derive(Debug, Clone, Copy)]
enum Shape {
    /// Big-endian integer of `bytes` length divided by `scale`.
    Scalar { bytes: usize, signed: bool, scale: f64 },
    /// Three signed 16-bit axes divided by `scale`.
    Xyz { scale: f64 },
    Gps,
    Colour,
}

impl Shape {
    fn size(&self) -> usize {
        match self {
            Shape::Scalar { bytes, .. } => *bytes,
            Shape::Xyz { .. } => 6,
            Shape::Gps => 9,
            Shape::Colour => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SensorType {
    id: u8,
    name: &'static str,
    shape: Shape,
}

const fn unsigned(id: u8, name: &'static str, bytes: usize, scale: f64) -> SensorType {
    SensorType {
        id,
        name,
        shape: Shape::Scalar {
            bytes,
            signed: false,
            scale,
        },
    }
}

const fn signed(id: u8, name: &'static str, bytes: usize, scale: f64) -> SensorType {
    SensorType {
        id,
        name,
        shape: Shape::Scalar {
            bytes,
            signed: true,
            scale,
        },
    }
}

const SENSOR_TYPES: &[SensorType] = &[
    unsigned(0, "digital_input", 1, 1.0),
    unsigned(1, "digital_output", 1, 1.0),
    signed(2, "analog_input", 2, 100.0),
    signed(3, "analog_output", 2, 100.0),
    unsigned(100, "generic_sensor", 4, 1.0),
    unsigned(101, "illuminance", 2, 1.0),
    unsigned(102, "presence", 1, 1.0),
    signed(103, "temperature", 2, 10.0),
    unsigned(104, "humidity", 1, 2.0),
    SensorType {
        id: 113,
        name: "accelerometer",
        shape: Shape::Xyz { scale: 1000.0 },
    },
    unsigned(115, "barometer", 2, 10.0),
    unsigned(116, "voltage", 2, 100.0),
    unsigned(117, "current", 2, 1000.0),
    unsigned(118, "frequency", 4, 1.0),
    unsigned(120, "percentage", 1, 1.0),
    signed(121, "altitude", 2, 1.0),
    unsigned(125, "concentration", 2, 1.0),
    unsigned(128, "power", 2, 1.0),
    unsigned(130, "distance", 4, 1000.0),
    unsigned(131, "energy", 4, 1000.0),
    unsigned(132, "direction", 2, 1.0),
    unsigned(133, "unix_time", 4, 1.0),
    SensorType {
        id: 134,
        name: "gyrometer",
        shape: Shape::Xyz { scale: 100.0 },
    },
    SensorType {
        id: 135,
        name: "colour",
        shape: Shape::Colour,
    },
    SensorType {
        id: 136,
        name: "gps",
        shape: Shape::Gps,
    },
    unsigned(142, "switch", 1, 1.0),
];

fn by_id(id: u8) -> Result<&'static SensorType> {
    SENSOR_TYPES
        .iter()
        .find(|t| t.id == id)
        .ok_or(PayloadError::UnsupportedType(id))
}

fn by_name(name: &str) -> Option<&'static SensorType> {
    SENSOR_TYPES.iter().find(|t| t.name == name)
}

fn read_int(data: &[u8], signed: bool) -> i64 {
    let raw = data.iter().fold(0i64, |acc, b| (acc << 8) | i64::from(*b));
    if signed {
        let bits = 64 - 8 * data.len() as u32;
        (raw << bits) >> bits
    } else {
        raw
    }
}

fn write_int(out: &mut Vec<u8>, value: i64, bytes: usize) {
    let be = value.to_be_bytes();
    out.extend_from_slice(&be[8 - bytes..]);
}

fn scaled(raw: i64, scale: f64) -> Value {
    if scale == 1.0 {
        json!(raw)
    } else {
        json!(raw as f64 / scale)
    }
}

/// Rounds `value * scale` and checks it fits the field width.
fn to_raw(field: &str, value: f64, scale: f64, bytes: usize, signed: bool) -> Result<i64> {
    let raw = (value * scale).round();
    let bits = 8 * bytes as u32;
    let (min, max) = if signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    };
    if !raw.is_finite() || raw < min as f64 || raw > max as f64 {
        return Err(PayloadError::OutOfRange {
            field: field.to_string(),
        });
    }
    Ok(raw as i64)
}

fn number(field: &str, value: Option<&Value>) -> Result<f64> {
    value
        .and_then(Value::as_f64)
        .ok_or_else(|| PayloadError::InvalidPayload(format!("`{}` must be a number", field)))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CayenneLpp;

impl CayenneLpp {
    pub fn new() -> Self {
        Self
    }

    fn decode_value(sensor: &SensorType, data: &[u8]) -> Value {
        match sensor.shape {
            Shape::Scalar { signed, scale, .. } => scaled(read_int(data, signed), scale),
            Shape::Xyz { scale } => json!({
                "x": read_int(&data[0..2], true) as f64 / scale,
                "y": read_int(&data[2..4], true) as f64 / scale,
                "z": read_int(&data[4..6], true) as f64 / scale,
            }),
            Shape::Gps => json!({
                "latitude": read_int(&data[0..3], true) as f64 / 10000.0,
                "longitude": read_int(&data[3..6], true) as f64 / 10000.0,
                "altitude": read_int(&data[6..9], true) as f64 / 100.0,
            }),
            Shape::Colour => json!({ "r": data[0], "g": data[1], "b": data[2] }),
        }
    }

    fn encode_value(out: &mut Vec<u8>, field: &str, sensor: &SensorType, value: &Value) -> Result<()> {
        match sensor.shape {
            Shape::Scalar {
                bytes,
                signed,
                scale,
            } => {
                let raw = to_raw(field, number(field, Some(value))?, scale, bytes, signed)?;
                write_int(out, raw, bytes);
            }
            Shape::Xyz { scale } => {
                for axis in ["x", "y", "z"] {
                    let raw = to_raw(field, number(field, value.get(axis))?, scale, 2, true)?;
                    write_int(out, raw, 2);
                }
            }
            Shape::Gps => {
                for (key, scale) in [("latitude", 10000.0), ("longitude", 10000.0), ("altitude", 100.0)] {
                    let raw = to_raw(field, number(field, value.get(key))?, scale, 3, true)?;
                    write_int(out, raw, 3);
                }
            }
            Shape::Colour => {
                for key in ["r", "g", "b"] {
                    let raw = to_raw(field, number(field, value.get(key))?, 1.0, 1, false)?;
                    write_int(out, raw, 1);
                }
            }
        }
        Ok(())
    }
}

impl PayloadCodec for CayenneLpp {
    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut result = Map::new();
        let mut offset = 0;

        while offset < bytes.len() {
            if offset + 2 > bytes.len() {
                return Err(PayloadError::InsufficientData {
                    expected: 2,
                    actual: bytes.len() - offset,
                });
            }
            let channel = bytes[offset];
            let sensor = by_id(bytes[offset + 1])?;
            offset += 2;

            let size = sensor.shape.size();
            if offset + size > bytes.len() {
                return Err(PayloadError::InsufficientData {
                    expected: size,
                    actual: bytes.len() - offset,
                });
            }
            let value = Self::decode_value(sensor, &bytes[offset..offset + size]);
            offset += size;

            result.insert(format!("{}_{}", sensor.name, channel), value);
        }

        Ok(Value::Object(result))
    }

    fn encode(&self, object: &Map<String, Value>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (field, value) in object {
            let (name, channel) = field
                .rsplit_once('_')
                .and_then(|(name, channel)| Some((name, channel.parse::<u8>().ok()?)))
                .ok_or_else(|| {
                    PayloadError::InvalidPayload(format!("invalid field name `{}`", field))
                })?;
            let sensor = by_name(name)
                .ok_or_else(|| PayloadError::InvalidPayload(format!("unknown type `{}`", name)))?;
            out.push(channel);
            out.push(sensor.id);
            Self::encode_value(&mut out, field, sensor, value)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Value {
        CayenneLpp::new().decode(bytes).unwrap()
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(decode(&[]), json!({}));
    }

    #[test]
    fn test_digital_input() {
        assert_eq!(decode(&[0x03, 0x00, 0x64]), json!({"digital_input_3": 100}));
    }

    #[test]
    fn test_analog_input() {
        assert_eq!(decode(&[0x03, 0x02, 0x00, 0x0A]), json!({"analog_input_3": 0.1}));
    }

    #[test]
    fn test_negative_temperature() {
        // -4.1 degrees
        assert_eq!(decode(&[0x01, 0x67, 0xFF, 0xD7]), json!({"temperature_1": -4.1}));
    }

    #[test]
    fn test_multiple_channels() {
        let result = decode(&[0x00, 0x67, 0x01, 0x10, 0x01, 0x68, 0x78]);

        assert_eq!(result, json!({"temperature_0": 27.2, "humidity_1": 60.0}));
    }

    #[test]
    fn test_gps() {
        let payload = [
            0x01, 0x88, 0x06, 0x76, 0x5f, 0xf2, 0x96, 0x0a, 0x00, 0x03, 0xe8,
        ];

        let result = decode(&payload);

        assert_eq!(result["gps_1"]["latitude"], json!(42.3519));
        assert_eq!(result["gps_1"]["longitude"], json!(-87.9094));
        assert_eq!(result["gps_1"]["altitude"], json!(10.0));
    }

    #[test]
    fn test_truncated_value() {
        let err = CayenneLpp::new().decode(&[0x01, 0x67, 0x01]).unwrap_err();

        assert!(matches!(
            err,
            PayloadError::InsufficientData {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_unsupported_type() {
        let err = CayenneLpp::new().decode(&[0x01, 0xFE, 0x00]).unwrap_err();

        assert!(matches!(err, PayloadError::UnsupportedType(0xFE)));
    }

    #[test]
    fn test_encode_downlink_fields() {
        let object = json!({"analog_output_2": -1.5, "digital_output_1": 1})
            .as_object()
            .cloned()
            .unwrap();

        let bytes = CayenneLpp::new().encode(&object).unwrap();

        assert_eq!(bytes, vec![0x02, 0x03, 0xFF, 0x6A, 0x01, 0x01, 0x01]);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let object = json!({"humidity_1": 200.0}).as_object().cloned().unwrap();

        let err = CayenneLpp::new().encode(&object).unwrap_err();

        assert!(matches!(err, PayloadError::OutOfRange { .. }));
    }

    #[test]
    fn test_encode_rejects_unknown_field() {
        let object = json!({"temperature": 1.0}).as_object().cloned().unwrap();

        assert!(CayenneLpp::new().encode(&object).is_err());
    }
}
