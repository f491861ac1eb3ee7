//! Conversion between JSON values and ABI values.
//!
//! Inputs are coerced by walking the parameter's [`ValueShape`], so struct
//! arguments can be given either as objects keyed by component name or as
//! positional arrays. Outputs are projected back the same way: named tuples
//! come out as objects, everything else as arrays and strings.

use std::str::FromStr;

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Word},
    json_abi::{Function, Param},
    primitives::{Address, Bytes, I256, U256},
};
use serde_json::{Map, Value};

use super::shape::{ArgumentShape, ScalarType, ValueShape};
use crate::error::{ContractError, Result};

/// Encodes calldata for `function` from collapsed arguments.
pub fn encode_call(function: &Function, args: &ArgumentShape) -> Result<Bytes> {
    let values = encode_arguments(function, args)?;
    let data = function
        .abi_encode_input(&values)
        .map_err(|source| ContractError::Decode {
            name: function.name.clone(),
            source,
        })?;
    Ok(data.into())
}

/// Coerces each positional argument against the matching input parameter.
pub fn encode_arguments(function: &Function, args: &ArgumentShape) -> Result<Vec<DynSolValue>> {
    let params = args.to_params();
    if params.len() != function.inputs.len() {
        return Err(ContractError::InvalidArguments {
            function_name: function.name.clone(),
            reason: format!(
                "expected {} argument(s), got {}",
                function.inputs.len(),
                params.len()
            ),
        });
    }

    function
        .inputs
        .iter()
        .zip(params.iter())
        .map(|(input, value)| {
            to_sol_value(value, input).map_err(|reason| ContractError::InvalidArguments {
                function_name: function.name.clone(),
                reason,
            })
        })
        .collect()
}

/// Decodes raw return data into positional values.
pub fn decode_output(function: &Function, data: &[u8]) -> Result<Vec<DynSolValue>> {
    function
        .abi_decode_output(data, false)
        .map_err(|source| ContractError::Decode {
            name: function.name.clone(),
            source,
        })
}

/// Coerces a JSON value into the ABI value described by `param`.
pub fn to_sol_value(value: &Value, param: &Param) -> std::result::Result<DynSolValue, String> {
    let shape = ValueShape::from_param(param).map_err(|e| e.to_string())?;
    let label = if param.name.is_empty() {
        param.ty.clone()
    } else {
        param.name.clone()
    };
    coerce(value, &shape, &label)
}

pub(crate) fn coerce(
    value: &Value,
    shape: &ValueShape,
    path: &str,
) -> std::result::Result<DynSolValue, String> {
    match shape {
        ValueShape::Scalar(scalar) => coerce_scalar(value, *scalar, path),
        ValueShape::Array(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected an array"))?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| coerce(item, inner, &format!("{path}[{i}]")))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(DynSolValue::Array)
        }
        ValueShape::FixedArray(inner, size) => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected an array of length {size}"))?;
            if items.len() != *size {
                return Err(format!(
                    "{path}: expected {size} elements, got {}",
                    items.len()
                ));
            }
            items
                .iter()
                .enumerate()
                .map(|(i, item)| coerce(item, inner, &format!("{path}[{i}]")))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(DynSolValue::FixedArray)
        }
        ValueShape::Tuple(components) => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected a tuple as an array"))?;
            coerce_positional(items, components.iter(), path)
        }
        ValueShape::Record(fields) => match value {
            Value::Object(map) => fields
                .iter()
                .map(|(name, field)| {
                    let item = map
                        .get(name)
                        .ok_or_else(|| format!("{path}: missing field '{name}'"))?;
                    coerce(item, field, &format!("{path}.{name}"))
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(DynSolValue::Tuple),
            Value::Array(items) => {
                coerce_positional(items, fields.iter().map(|(_, field)| field), path)
            }
            _ => Err(format!("{path}: expected an object or an array")),
        },
    }
}

fn coerce_positional<'a>(
    items: &[Value],
    components: impl ExactSizeIterator<Item = &'a ValueShape>,
    path: &str,
) -> std::result::Result<DynSolValue, String> {
    if items.len() != components.len() {
        return Err(format!(
            "{path}: expected {} components, got {}",
            components.len(),
            items.len()
        ));
    }
    items
        .iter()
        .zip(components)
        .enumerate()
        .map(|(i, (item, component))| coerce(item, component, &format!("{path}.{i}")))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(DynSolValue::Tuple)
}

fn coerce_scalar(
    value: &Value,
    scalar: ScalarType,
    path: &str,
) -> std::result::Result<DynSolValue, String> {
    match scalar {
        ScalarType::Address => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("{path}: address must be a string"))?;
            Address::from_str(s)
                .map(DynSolValue::Address)
                .map_err(|e| format!("{path}: invalid address '{s}': {e}"))
        }
        ScalarType::Bool => match value {
            Value::Bool(b) => Ok(DynSolValue::Bool(*b)),
            Value::String(s) if s == "true" || s == "false" => Ok(DynSolValue::Bool(s == "true")),
            _ => Err(format!("{path}: expected a boolean")),
        },
        ScalarType::String => value
            .as_str()
            .map(|s| DynSolValue::String(s.to_string()))
            .ok_or_else(|| format!("{path}: expected a string")),
        ScalarType::Bytes => parse_hex(value, path).map(DynSolValue::Bytes),
        ScalarType::FixedBytes(size) => {
            let bytes = parse_hex(value, path)?;
            if bytes.len() > size {
                return Err(format!(
                    "{path}: expected at most {size} bytes, got {}",
                    bytes.len()
                ));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(Word::from(word), size))
        }
        ScalarType::Uint(bits) => {
            let num = parse_uint(value).ok_or_else(|| format!("{path}: invalid uint{bits}"))?;
            if num.bit_len() > bits {
                return Err(format!("{path}: {num} does not fit in uint{bits}"));
            }
            Ok(DynSolValue::Uint(num, bits))
        }
        ScalarType::Int(bits) => {
            let num = parse_int(value).ok_or_else(|| format!("{path}: invalid int{bits}"))?;
            let fits = bits == 256 || {
                let bound = I256::ONE << (bits - 1);
                num >= -bound && num < bound
            };
            if !fits {
                return Err(format!("{path}: {num} does not fit in int{bits}"));
            }
            Ok(DynSolValue::Int(num, bits))
        }
        ScalarType::Function => Err(format!("{path}: function-typed arguments are not supported")),
    }
}

fn parse_hex(value: &Value, path: &str) -> std::result::Result<Vec<u8>, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("{path}: bytes must be a hex string"))?;
    hex::decode(s.trim_start_matches("0x")).map_err(|_| format!("{path}: invalid hex string '{s}'"))
}

fn parse_uint(value: &Value) -> Option<U256> {
    match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16).ok(),
            None => U256::from_str_radix(s, 10).ok(),
        },
        _ => None,
    }
}

fn parse_int(value: &Value) -> Option<I256> {
    match value {
        Value::Number(n) => n.as_i64().map(I256::try_from).and_then(|r| r.ok()),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(_) => I256::from_hex_str(s).ok(),
            None => I256::from_dec_str(s).ok(),
        },
        _ => None,
    }
}

/// Projects a decoded value into JSON following `shape`.
///
/// Values that do not line up with the shape are rendered without it.
pub fn from_sol_value(value: &DynSolValue, shape: &ValueShape) -> Value {
    match (value, shape) {
        (DynSolValue::Array(items), ValueShape::Array(inner))
        | (DynSolValue::FixedArray(items), ValueShape::FixedArray(inner, _)) => {
            Value::Array(items.iter().map(|item| from_sol_value(item, inner)).collect())
        }
        (DynSolValue::Tuple(items), ValueShape::Record(fields)) if items.len() == fields.len() => {
            let map: Map<String, Value> = fields
                .iter()
                .zip(items)
                .map(|((name, field), item)| (name.clone(), from_sol_value(item, field)))
                .collect();
            Value::Object(map)
        }
        (DynSolValue::Tuple(items), ValueShape::Tuple(components))
            if items.len() == components.len() =>
        {
            Value::Array(
                items
                    .iter()
                    .zip(components)
                    .map(|(item, component)| from_sol_value(item, component))
                    .collect(),
            )
        }
        _ => plain(value),
    }
}

/// Renders a decoded value without schema information.
pub fn plain(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(plain).collect())
        }
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// Projects decoded values for a parameter list, one JSON value per parameter.
pub fn project_params(params: &[Param], values: &[DynSolValue]) -> Vec<Value> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| match params.get(i).map(ValueShape::from_param) {
            Some(Ok(shape)) => from_sol_value(value, &shape),
            _ => plain(value),
        })
        .collect()
}

/// Named view over a parameter list. Unnamed or repeated names are skipped.
pub fn named_params<'a>(
    names: impl IntoIterator<Item = &'a str>,
    projected: &[Value],
) -> Map<String, Value> {
    let mut named = Map::new();
    for (name, value) in names.into_iter().zip(projected) {
        if !name.is_empty() && !named.contains_key(name) {
            named.insert(name.to_string(), value.clone());
        }
    }
    named
}
