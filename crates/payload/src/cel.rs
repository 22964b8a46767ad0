//! CEL environment for scripted payload formatters.
//!
//! Expressions see these variables:
//!
//! - `input`: the FRMPayload as bytes,
//! - `f_port`: the frame port,
//! - any extra variables the caller binds (`data`, `version_ids`).
//!
//! Registered functions:
//!
//! ```cel
//! cayenne_lpp_decode(input)          // {"temperature_1": 27.2}
//! cayenne_lpp_encode({'digital_output_1': 1})
//! bytes_to_ints(input)               // [193]
//! sum(bytes_to_ints(input))          // 193
//! ```

use base64::Engine;
use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, ExecutionError, Program, Value as CelValue};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

use crate::cayenne_lpp::CayenneLpp;
use crate::{PayloadCodec, PayloadError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct CelEnvironment;

impl CelEnvironment {
    pub fn new() -> Self {
        Self
    }

    /// Compiles and runs `expression` with `input` and `variables` bound.
    pub fn evaluate(
        &self,
        expression: &str,
        input: &[u8],
        variables: &JsonMap<String, JsonValue>,
    ) -> Result<CelValue> {
        let program = Program::compile(expression)
            .map_err(|e| PayloadError::CelCompilationError(e.to_string()))?;

        let mut context = Context::default();
        register_functions(&mut context);
        context.add_variable_from_value("input", CelValue::Bytes(Arc::new(input.to_vec())));
        for (name, value) in variables {
            context.add_variable_from_value(name.as_str(), json_to_cel_value(value.clone())?);
        }

        program
            .execute(&context)
            .map_err(|e| PayloadError::CelExecutionError(e.to_string()))
    }

    /// Like [`CelEnvironment::evaluate`], converting the result to JSON.
    pub fn execute(
        &self,
        expression: &str,
        input: &[u8],
        variables: &JsonMap<String, JsonValue>,
    ) -> Result<JsonValue> {
        cel_value_to_json(self.evaluate(expression, input, variables)?)
    }
}

fn function_error(function: &str, message: impl ToString) -> ExecutionError {
    ExecutionError::FunctionError {
        function: function.to_string(),
        message: message.to_string(),
    }
}

fn register_functions(context: &mut Context) {
    context.add_function(
        "cayenne_lpp_decode",
        |bytes: Arc<Vec<u8>>| -> std::result::Result<CelValue, ExecutionError> {
            CayenneLpp::new()
                .decode(&bytes)
                .and_then(json_to_cel_value)
                .map_err(|e| function_error("cayenne_lpp_decode", e))
        },
    );
    context.add_function(
        "cayenne_lpp_encode",
        |object: CelValue| -> std::result::Result<CelValue, ExecutionError> {
            let json = cel_value_to_json(object).map_err(|e| function_error("cayenne_lpp_encode", e))?;
            let map = json
                .as_object()
                .ok_or_else(|| function_error("cayenne_lpp_encode", "argument must be a map"))?;
            CayenneLpp::new()
                .encode(map)
                .map(|bytes| CelValue::Bytes(Arc::new(bytes)))
                .map_err(|e| function_error("cayenne_lpp_encode", e))
        },
    );
    context.add_function(
        "bytes_to_ints",
        |bytes: Arc<Vec<u8>>| -> std::result::Result<CelValue, ExecutionError> {
            let ints = bytes.iter().map(|b| CelValue::Int(i64::from(*b))).collect();
            Ok(CelValue::List(Arc::new(ints)))
        },
    );
    context.add_function(
        "sum",
        |list: CelValue| -> std::result::Result<CelValue, ExecutionError> {
            let CelValue::List(items) = list else {
                return Err(function_error("sum", "argument must be a list"));
            };
            let mut int_total: i64 = 0;
            let mut float_total: Option<f64> = None;
            for item in items.iter() {
                match item {
                    CelValue::Int(i) => int_total = int_total.saturating_add(*i),
                    CelValue::UInt(u) => {
                        int_total = int_total.saturating_add(i64::try_from(*u).unwrap_or(i64::MAX))
                    }
                    CelValue::Float(f) => *float_total.get_or_insert(0.0) += f,
                    _ => return Err(function_error("sum", "list items must be numbers")),
                }
            }
            Ok(match float_total {
                Some(f) => CelValue::Float(f + int_total as f64),
                None => CelValue::Int(int_total),
            })
        },
    );
}

pub fn cel_value_to_json(value: CelValue) -> Result<JsonValue> {
    match value {
        CelValue::String(s) => Ok(JsonValue::String(s.to_string())),
        CelValue::Int(i) => Ok(JsonValue::Number(i.into())),
        CelValue::UInt(u) => Ok(JsonValue::Number(u.into())),
        CelValue::Float(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| PayloadError::InvalidOutput(format!("non-finite number {}", f))),
        CelValue::Bool(b) => Ok(JsonValue::Bool(b)),
        CelValue::Bytes(b) => Ok(JsonValue::String(
            base64::engine::general_purpose::STANDARD.encode(b.as_slice()),
        )),
        CelValue::List(items) => items
            .iter()
            .map(|item| cel_value_to_json(item.clone()))
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array),
        CelValue::Map(map) => {
            let mut object = JsonMap::new();
            for (key, value) in map.map.iter() {
                let key = match key {
                    Key::String(s) => s.to_string(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                object.insert(key, cel_value_to_json(value.clone())?);
            }
            Ok(JsonValue::Object(object))
        }
        CelValue::Null => Ok(JsonValue::Null),
        other => Err(PayloadError::InvalidOutput(format!(
            "unsupported value {:?}",
            other
        ))),
    }
}

pub fn json_to_cel_value(json: JsonValue) -> Result<CelValue> {
    match json {
        JsonValue::Null => Ok(CelValue::Null),
        JsonValue::Bool(b) => Ok(CelValue::Bool(b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(CelValue::Int(i))
            } else if let Some(u) = n.as_u64() {
                Ok(CelValue::UInt(u))
            } else {
                n.as_f64()
                    .map(CelValue::Float)
                    .ok_or_else(|| PayloadError::InvalidOutput(format!("invalid number {}", n)))
            }
        }
        JsonValue::String(s) => Ok(CelValue::String(Arc::new(s))),
        JsonValue::Array(items) => items
            .into_iter()
            .map(json_to_cel_value)
            .collect::<Result<Vec<_>>>()
            .map(|items| CelValue::List(Arc::new(items))),
        JsonValue::Object(object) => {
            let mut map: HashMap<Key, CelValue> = HashMap::with_capacity(object.len());
            for (key, value) in object {
                map.insert(Key::String(Arc::new(key)), json_to_cel_value(value)?);
            }
            Ok(CelValue::Map(Map { map: Arc::new(map) }))
        }
    }
}

/// Converts an encoder result to bytes: either CEL bytes or a list of
/// integers in `0..=255`.
pub fn cel_value_to_bytes(value: &CelValue) -> Result<Vec<u8>> {
    match value {
        CelValue::Bytes(bytes) => Ok(bytes.to_vec()),
        CelValue::List(items) => items
            .iter()
            .map(|item| {
                let n = match item {
                    CelValue::Int(i) => *i,
                    CelValue::UInt(u) => i64::try_from(*u).unwrap_or(i64::MAX),
                    _ => -1,
                };
                u8::try_from(n).map_err(|_| {
                    PayloadError::InvalidOutput("bytes must be integers in 0..=255".to_string())
                })
            })
            .collect(),
        other => Err(PayloadError::InvalidOutput(format!(
            "expected bytes, got {:?}",
            other
        ))),
    }
}
