//! Shaping of decoded results.
//!
//! Decoding already yields exact positional values, so normalization is a
//! single pass: collapse by output count and name struct fields from the
//! output schema. [`parse_contract_result`] does the same for results that
//! have been through JSON, such as cached reads.

use alloy::{dyn_abi::DynSolValue, json_abi::Function};
use serde_json::Value;

use crate::abi::{value, ArgumentShape, ValueShape};

/// 0 outputs → `Empty`, 1 → `Single`, N → `Many` of length N.
pub fn normalize_output(function: &Function, values: &[DynSolValue]) -> ArgumentShape {
    ArgumentShape::collapse(value::project_params(&function.outputs, values))
}

/// Canonicalizes a raw JSON result against `function`'s outputs.
///
/// Positional arrays are projected through the output schema: one output
/// unwraps to the bare value, several stay an array of the same length.
/// Anything that is not array-like, or does not match the output count, is
/// returned unchanged.
pub fn parse_contract_result(function: &Function, data: Value) -> Value {
    let Value::Array(mut items) = data else {
        return data;
    };

    match function.outputs.len() {
        0 if items.is_empty() => Value::Null,
        1 if items.len() == 1 => canonical(items.remove(0), &function.outputs[0]),
        n if n > 1 && items.len() == n => Value::Array(
            items
                .into_iter()
                .zip(&function.outputs)
                .map(|(item, output)| canonical(item, output))
                .collect(),
        ),
        _ => Value::Array(items),
    }
}

fn canonical(item: Value, output: &alloy::json_abi::Param) -> Value {
    let Ok(shape) = ValueShape::from_param(output) else {
        return item;
    };
    match value::coerce(&item, &shape, &output.name) {
        Ok(decoded) => value::from_sol_value(&decoded, &shape),
        Err(_) => item,
    }
}
