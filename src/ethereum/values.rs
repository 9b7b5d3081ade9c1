//! Typed values: conforming caller arguments to declared ABI types, and
//! extracting Rust types from decoded values.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, Bytes, B256, I256, U256},
};

use crate::error::{BindingError, Result};

/// Check `value` against `ty` and normalise it to the declared width/size.
///
/// Integers supplied at any width are accepted when they fit the declared
/// type; a signed value is accepted for an unsigned type only when it is
/// non-negative. Fixed bytes must match the declared size exactly, except
/// that a dynamic `bytes` value of exactly that length is also accepted.
pub fn conform(ty: &DynSolType, value: DynSolValue) -> std::result::Result<DynSolValue, String> {
    match (ty, value) {
        (DynSolType::Bool, v @ DynSolValue::Bool(_)) => Ok(v),
        (DynSolType::Address, v @ DynSolValue::Address(_)) => Ok(v),
        (DynSolType::String, v @ DynSolValue::String(_)) => Ok(v),
        (DynSolType::Bytes, v @ DynSolValue::Bytes(_)) => Ok(v),
        (DynSolType::Function, v @ DynSolValue::Function(_)) => Ok(v),

        (DynSolType::Uint(bits), DynSolValue::Uint(n, _)) => {
            if n.bit_len() > *bits {
                return Err(format!("{} does not fit in uint{}", n, bits));
            }
            Ok(DynSolValue::Uint(n, *bits))
        }
        (DynSolType::Uint(bits), DynSolValue::Int(n, _)) => {
            if n.is_negative() {
                return Err(format!("negative value {} for uint{}", n, bits));
            }
            conform(ty, DynSolValue::Uint(n.into_raw(), 256))
        }
        (DynSolType::Int(bits), DynSolValue::Int(n, _)) => {
            if !int_fits(n, *bits) {
                return Err(format!("{} does not fit in int{}", n, bits));
            }
            Ok(DynSolValue::Int(n, *bits))
        }
        (DynSolType::Int(bits), DynSolValue::Uint(n, _)) => {
            // non-negative signed values need one bit of headroom for the sign
            if n.bit_len() >= *bits {
                return Err(format!("{} does not fit in int{}", n, bits));
            }
            Ok(DynSolValue::Int(I256::from_raw(n), *bits))
        }

        (DynSolType::FixedBytes(size), DynSolValue::FixedBytes(word, given)) => {
            if given != *size {
                return Err(format!("bytes{} value for bytes{}", given, size));
            }
            Ok(DynSolValue::FixedBytes(word, *size))
        }
        (DynSolType::FixedBytes(size), DynSolValue::Bytes(bytes)) => {
            if bytes.len() != *size {
                return Err(format!("{} bytes for bytes{}", bytes.len(), size));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(B256::from(word), *size))
        }

        (DynSolType::Array(inner), DynSolValue::Array(items)) => {
            let items = conform_all(inner, items)?;
            Ok(DynSolValue::Array(items))
        }
        (DynSolType::FixedArray(inner, len), DynSolValue::FixedArray(items))
        | (DynSolType::FixedArray(inner, len), DynSolValue::Array(items)) => {
            if items.len() != *len {
                return Err(format!(
                    "{} elements for a fixed array of {}",
                    items.len(),
                    len
                ));
            }
            let items = conform_all(inner, items)?;
            Ok(DynSolValue::FixedArray(items))
        }
        (DynSolType::Tuple(types), DynSolValue::Tuple(items)) => {
            if items.len() != types.len() {
                return Err(format!(
                    "{} components for a tuple of {}",
                    items.len(),
                    types.len()
                ));
            }
            let items = types
                .iter()
                .zip(items)
                .map(|(ty, item)| conform(ty, item))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Tuple(items))
        }

        (ty, value) => Err(format!(
            "expected {}, got {}",
            ty.sol_type_name(),
            describe(&value)
        )),
    }
}

fn conform_all(
    ty: &DynSolType,
    items: Vec<DynSolValue>,
) -> std::result::Result<Vec<DynSolValue>, String> {
    items.into_iter().map(|item| conform(ty, item)).collect()
}

fn int_fits(n: I256, bits: usize) -> bool {
    if bits >= 256 {
        return true;
    }
    // for negative n, !raw == -n - 1, which needs the same magnitude bits
    let magnitude = if n.is_negative() { !n.into_raw() } else { n.into_raw() };
    magnitude.bit_len() < bits
}

/// Short human description of a value's kind, for error messages
pub fn describe(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(_) => "bool".to_string(),
        DynSolValue::Int(_, bits) => format!("int{}", bits),
        DynSolValue::Uint(_, bits) => format!("uint{}", bits),
        DynSolValue::FixedBytes(_, size) => format!("bytes{}", size),
        DynSolValue::Address(_) => "address".to_string(),
        DynSolValue::Function(_) => "function".to_string(),
        DynSolValue::Bytes(_) => "bytes".to_string(),
        DynSolValue::String(_) => "string".to_string(),
        DynSolValue::Array(_) => "array".to_string(),
        DynSolValue::FixedArray(items) => format!("array[{}]", items.len()),
        DynSolValue::Tuple(_) => "tuple".to_string(),
        #[allow(unreachable_patterns)]
        _ => "value".to_string(),
    }
}

/// Conversion from a decoded ABI value into a concrete Rust type
pub trait FromSolValue: Sized {
    fn from_sol_value(value: DynSolValue) -> Result<Self>;
}

fn mismatch<T>(wanted: &str, value: &DynSolValue) -> Result<T> {
    Err(BindingError::Decode(format!(
        "cannot read {} as {}",
        describe(value),
        wanted
    )))
}

impl FromSolValue for DynSolValue {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        Ok(value)
    }
}

impl FromSolValue for U256 {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Uint(n, _) => Ok(n),
            other => mismatch("uint", &other),
        }
    }
}

impl FromSolValue for I256 {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Int(n, _) => Ok(n),
            other => mismatch("int", &other),
        }
    }
}

impl FromSolValue for u64 {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        let n = U256::from_sol_value(value)?;
        u64::try_from(n).map_err(|_| BindingError::Decode(format!("{} overflows u64", n)))
    }
}

impl FromSolValue for u128 {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        let n = U256::from_sol_value(value)?;
        u128::try_from(n).map_err(|_| BindingError::Decode(format!("{} overflows u128", n)))
    }
}

impl FromSolValue for bool {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl FromSolValue for Address {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Address(a) => Ok(a),
            other => mismatch("address", &other),
        }
    }
}

impl FromSolValue for String {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::String(s) => Ok(s),
            other => mismatch("string", &other),
        }
    }
}

impl FromSolValue for Vec<u8> {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Bytes(b) => Ok(b),
            DynSolValue::FixedBytes(word, size) => Ok(word[..size].to_vec()),
            other => mismatch("bytes", &other),
        }
    }
}

impl FromSolValue for Bytes {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        Vec::<u8>::from_sol_value(value).map(Bytes::from)
    }
}

impl FromSolValue for B256 {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::FixedBytes(word, 32) => Ok(word),
            other => mismatch("bytes32", &other),
        }
    }
}

impl<T: FromSolValue> FromSolValue for Vec<T> {
    fn from_sol_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
                items.into_iter().map(T::from_sol_value).collect()
            }
            other => mismatch("array", &other),
        }
    }
}
