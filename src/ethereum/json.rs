//! Conversion between JSON and ABI values, used by the command line

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::Param,
    primitives::{Address, I256, U256},
};
use serde_json::Value;
use std::str::FromStr;

use super::codec::{DecodedEvent, DecodedOutput};
use crate::error::{BindingError, Result};

/// Convert JSON parameters against `params`.
///
/// Accepts a positional array (`[1, "0x..."]`) or an object keyed by
/// parameter name (`{"poolId": 1}`). `null` stands for no arguments.
pub fn values_from_json(params: &[Param], parameters: &Value) -> Result<Vec<DynSolValue>> {
    let expected = || {
        params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let values: Vec<&Value> = match parameters {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => params
            .iter()
            .map(|param| {
                map.get(&param.name).ok_or_else(|| {
                    BindingError::ArgumentMismatch(format!(
                        "missing parameter '{}' of type '{}' (expected: {})",
                        param.name,
                        param.ty,
                        expected()
                    ))
                })
            })
            .collect::<Result<_>>()?,
        other => {
            return Err(BindingError::ArgumentMismatch(format!(
                "parameters must be an array or an object, got {} (expected: {})",
                other,
                expected()
            )))
        }
    };

    if values.len() != params.len() {
        return Err(BindingError::ArgumentMismatch(format!(
            "expected {} parameters, got {} (expected: {})",
            params.len(),
            values.len(),
            expected()
        )));
    }

    params
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (param, value))| {
            let ty = param
                .resolve()
                .map_err(|e| BindingError::InvalidDescriptor(e.to_string()))?;
            value_from_json(value, &ty).map_err(|e| {
                BindingError::ArgumentMismatch(format!(
                    "parameter #{} ('{}' of type '{}'): {}",
                    i + 1,
                    param.name,
                    param.ty,
                    e
                ))
            })
        })
        .collect()
}

/// Convert one JSON value to the ABI type `ty`
pub fn value_from_json(value: &Value, ty: &DynSolType) -> std::result::Result<DynSolValue, String> {
    match ty {
        DynSolType::Address => {
            let s = value.as_str().ok_or("address must be a string")?;
            Address::from_str(s)
                .map(DynSolValue::Address)
                .map_err(|e| format!("invalid address '{}': {}", s, e))
        }
        DynSolType::Bool => value
            .as_bool()
            .map(DynSolValue::Bool)
            .ok_or_else(|| "bool must be true or false".to_string()),
        DynSolType::String => value
            .as_str()
            .map(|s| DynSolValue::String(s.to_string()))
            .ok_or_else(|| "string parameter must be a string".to_string()),
        DynSolType::Uint(bits) => {
            let n = match value {
                Value::Number(n) => n
                    .as_u64()
                    .map(U256::from)
                    .ok_or_else(|| format!("invalid uint value {}", n))?,
                Value::String(s) => parse_uint(s)?,
                _ => return Err("uint must be a number or string".to_string()),
            };
            Ok(DynSolValue::Uint(n, *bits))
        }
        DynSolType::Int(bits) => {
            let n = match value {
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|n| I256::try_from(n).ok())
                    .ok_or_else(|| format!("invalid int value {}", n))?,
                Value::String(s) => {
                    I256::from_dec_str(s).map_err(|_| format!("invalid int string '{}'", s))?
                }
                _ => return Err("int must be a number or string".to_string()),
            };
            Ok(DynSolValue::Int(n, *bits))
        }
        DynSolType::Bytes | DynSolType::FixedBytes(_) => {
            let s = value.as_str().ok_or("bytes must be a hex string")?;
            let bytes = hex::decode(s.trim_start_matches("0x"))
                .map_err(|_| format!("invalid hex string '{}'", s))?;
            // fixed sizes are checked when the value is conformed
            Ok(DynSolValue::Bytes(bytes))
        }
        DynSolType::Array(inner) | DynSolType::FixedArray(inner, _) => {
            let items = value.as_array().ok_or("array parameter must be an array")?;
            let items = items
                .iter()
                .map(|item| value_from_json(item, inner))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Array(items))
        }
        DynSolType::Tuple(types) => {
            let items = value.as_array().ok_or("tuple parameter must be an array")?;
            if items.len() != types.len() {
                return Err(format!(
                    "tuple needs {} components, got {}",
                    types.len(),
                    items.len()
                ));
            }
            let items = types
                .iter()
                .zip(items)
                .map(|(ty, item)| value_from_json(item, ty))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Tuple(items))
        }
        other => Err(format!("unsupported Solidity type: {}", other.sol_type_name())),
    }
}

fn parse_uint(s: &str) -> std::result::Result<U256, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        U256::from_str_radix(hex, 16).map_err(|_| format!("invalid hex uint '{}'", s))
    } else {
        U256::from_str(s).map_err(|_| format!("invalid uint string '{}'", s))
    }
}

/// Render a decoded value as JSON
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Uint(n, _) => Value::String(n.to_string()),
        DynSolValue::Int(n, _) => Value::String(n.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

/// Render a call result: bare value, object of named outputs, or null
pub fn output_to_json(output: &DecodedOutput) -> Value {
    match output {
        DecodedOutput::Empty => Value::Null,
        DecodedOutput::Value(value) => value_to_json(value),
        DecodedOutput::Record(record) => Value::Object(
            record
                .fields()
                .iter()
                .map(|(name, value)| (name.clone(), value_to_json(value)))
                .collect(),
        ),
    }
}

/// Render a decoded event with its provenance
pub fn event_to_json(event: &DecodedEvent) -> Value {
    let fields: serde_json::Map<String, Value> = event
        .fields
        .iter()
        .map(|field| (field.name.clone(), value_to_json(&field.value)))
        .collect();

    serde_json::json!({
        "event": event.name,
        "fields": fields,
        "address": event.log.address.to_checksum(None),
        "block_number": event.log.block_number,
        "transaction_hash": event.log.transaction_hash.map(|h| format!("{:#x}", h)),
        "log_index": event.log.log_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::codec::encode_call;
    use crate::ethereum::interface::{fixtures::REWARD_POOL_ABI, Interface};
    use serde_json::json;

    #[test]
    fn test_positional_and_named_parameters() {
        let interface = Interface::from_json(REWARD_POOL_ABI).unwrap();
        let function = interface.function("createPool", None).unwrap();

        let positional = values_from_json(
            &function.inputs,
            &json!(["arena", "0x5FbDB2315678afecb367f032d93F642f64180aa3", "1000"]),
        )
        .unwrap();
        let named = values_from_json(
            &function.inputs,
            &json!({
                "name": "arena",
                "rewardToken": "0x5FbDB2315678afecb367f032d93F642f64180aa3",
                "totalReward": 1000
            }),
        )
        .unwrap();

        assert_eq!(
            encode_call(function, positional).unwrap(),
            encode_call(function, named).unwrap()
        );
    }

    #[test]
    fn test_missing_named_parameter() {
        let interface = Interface::from_json(REWARD_POOL_ABI).unwrap();
        let function = interface.function("createPool", None).unwrap();
        let err = values_from_json(&function.inputs, &json!({"name": "arena"})).unwrap_err();
        assert!(matches!(err, BindingError::ArgumentMismatch(_)));
    }

    #[test]
    fn test_uint_forms() {
        let ty = DynSolType::Uint(256);
        let expected = DynSolValue::Uint(U256::from(255), 256);
        assert_eq!(value_from_json(&json!(255), &ty).unwrap(), expected);
        assert_eq!(value_from_json(&json!("255"), &ty).unwrap(), expected);
        assert_eq!(value_from_json(&json!("0xff"), &ty).unwrap(), expected);
        assert!(value_from_json(&json!(true), &ty).is_err());
    }

    #[test]
    fn test_negative_int() {
        let value = value_from_json(&json!(-5), &DynSolType::Int(32)).unwrap();
        assert_eq!(value, DynSolValue::Int(I256::try_from(-5i64).unwrap(), 32));
    }

    #[test]
    fn test_output_rendering() {
        let output = DecodedOutput::Value(DynSolValue::Uint(U256::from(12), 256));
        assert_eq!(output_to_json(&output), json!("12"));
        assert_eq!(output_to_json(&DecodedOutput::Empty), Value::Null);
    }
}
