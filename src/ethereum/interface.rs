//! Parsed contract interface shared by every handle bound to it

use alloy::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::{Constructor, Event, Function, JsonAbi},
};
use std::collections::{BTreeMap, HashMap};

use super::json;
use crate::error::{BindingError, Result};

/// Topics available to indexed parameters besides the signature hash
const MAX_INDEXED: usize = 3;

/// An immutable, validated contract interface
#[derive(Debug, Clone)]
pub struct Interface {
    abi: JsonAbi,
}

impl Interface {
    /// Validate a parsed ABI.
    ///
    /// Fails if two functions share a selector or an event declares more
    /// indexed parameters than a log has topics for.
    pub fn new(abi: JsonAbi) -> Result<Self> {
        let mut seen: HashMap<[u8; 4], String> = HashMap::new();
        for function in abi.functions() {
            let signature = function.signature();
            if let Some(previous) = seen.insert(function.selector().0, signature.clone()) {
                return Err(BindingError::InvalidDescriptor(format!(
                    "selector 0x{} is shared by '{}' and '{}'",
                    hex::encode(function.selector()),
                    previous,
                    signature
                )));
            }
        }

        for event in abi.events() {
            let indexed = event.inputs.iter().filter(|input| input.indexed).count();
            let limit = if event.anonymous { MAX_INDEXED + 1 } else { MAX_INDEXED };
            if indexed > limit {
                return Err(BindingError::InvalidDescriptor(format!(
                    "event '{}' declares {} indexed parameters, at most {} fit in a log",
                    event.signature(),
                    indexed,
                    limit
                )));
            }
        }

        Ok(Self { abi })
    }

    /// Parse a JSON ABI array
    pub fn from_json(json: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json)?;
        Self::new(abi)
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.abi.functions()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.abi.events()
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.abi.constructor()
    }

    /// Resolve a function by name or full signature.
    ///
    /// `name` may be a plain name (`getPoolInfo`) or a canonical signature
    /// (`getPoolInfo(uint256)`). Overloads of a plain name are told apart by
    /// `arity`; an unresolvable overload set is reported as unknown.
    pub fn function(&self, name: &str, arity: Option<usize>) -> Result<&Function> {
        if name.contains('(') {
            return self
                .abi
                .functions()
                .find(|f| f.signature() == name)
                .ok_or_else(|| self.unknown_function(name));
        }

        let overloads = self
            .abi
            .function(name)
            .ok_or_else(|| self.unknown_function(name))?;

        match overloads.as_slice() {
            [only] => Ok(only),
            many => {
                let matching: Vec<&Function> = match arity {
                    Some(n) => many.iter().filter(|f| f.inputs.len() == n).collect(),
                    None => many.iter().collect(),
                };
                match matching.as_slice() {
                    [only] => Ok(only),
                    _ => Err(BindingError::UnknownFunction(format!(
                        "'{}' is overloaded ({}); call it by full signature",
                        name,
                        many.iter()
                            .map(|f| f.signature())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))),
                }
            }
        }
    }

    /// Resolve an event by name or full signature.
    ///
    /// An overloaded plain name is ambiguous and must be given as a signature.
    pub fn event(&self, name: &str) -> Result<&Event> {
        if name.contains('(') {
            return self
                .abi
                .events()
                .find(|e| e.signature() == name)
                .ok_or_else(|| self.unknown_event(name));
        }

        match self.abi.event(name).map(Vec::as_slice) {
            Some([only]) => Ok(only),
            Some(many) if !many.is_empty() => Err(BindingError::UnknownEvent(format!(
                "'{}' is overloaded ({}); use the full signature",
                name,
                many.iter()
                    .map(|e| e.signature())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
            _ => Err(self.unknown_event(name)),
        }
    }

    /// Render revert data of a custom error this interface declares, e.g.
    /// `PoolNotFound(99)`
    pub fn decode_error(&self, data: &[u8]) -> Option<String> {
        let selector = data.get(..4)?;
        let error = self
            .abi
            .errors()
            .find(|error| error.selector().as_slice() == selector)?;
        let values = error.abi_decode_input(&data[4..], true).ok()?;

        let rendered: Vec<String> = values.iter().map(render_value).collect();
        Some(format!("{}({})", error.name, rendered.join(", ")))
    }

    /// Dispatch tag (hex, no prefix) to human-readable signature
    pub fn method_table(&self) -> BTreeMap<String, String> {
        self.abi
            .functions()
            .map(|f| (hex::encode(f.selector()), f.signature()))
            .collect()
    }

    fn unknown_event(&self, name: &str) -> BindingError {
        let available: Vec<&str> = self.abi.events().map(|e| e.name.as_str()).collect();
        BindingError::UnknownEvent(format!(
            "'{}' (available: {})",
            name,
            available.join(", ")
        ))
    }

    fn unknown_function(&self, name: &str) -> BindingError {
        let available: Vec<&str> = self.abi.functions().map(|f| f.name.as_str()).collect();
        if available.is_empty() {
            BindingError::UnknownFunction(format!(
                "'{}' (the interface declares no functions)",
                name
            ))
        } else {
            BindingError::UnknownFunction(format!(
                "'{}' (available: {})",
                name,
                available.join(", ")
            ))
        }
    }
}

fn render_value(value: &DynSolValue) -> String {
    match json::value_to_json(value) {
        serde_json::Value::String(s) if matches!(value, DynSolValue::String(_)) => format!("{:?}", s),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
