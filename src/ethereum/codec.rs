//! ABI codec: typed arguments to calldata, return data and logs back to
//! typed values.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, EventExt, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Event, Function, Param},
    primitives::{keccak256, Bytes, B256},
};

use super::{values, values::FromSolValue, LogRecord};
use crate::error::{BindingError, Result};

/// Decoded return data of a function
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedOutput {
    /// The function declares no outputs
    Empty,
    /// Exactly one declared output, returned bare
    Value(DynSolValue),
    /// Several declared outputs, labelled by their declared names
    Record(Record),
}

impl DecodedOutput {
    /// Extract the single output as `T`
    pub fn into_value<T: FromSolValue>(self) -> Result<T> {
        match self {
            DecodedOutput::Value(value) => T::from_sol_value(value),
            DecodedOutput::Empty => Err(BindingError::Decode(
                "function has no outputs".to_string(),
            )),
            DecodedOutput::Record(record) => Err(BindingError::Decode(format!(
                "function has {} outputs, not one",
                record.len()
            ))),
        }
    }

    /// Take the labelled outputs of a multi-output function
    pub fn into_record(self) -> Result<Record> {
        match self {
            DecodedOutput::Record(record) => Ok(record),
            _ => Err(BindingError::Decode(
                "function does not return multiple outputs".to_string(),
            )),
        }
    }
}

/// Named outputs in declared order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, DynSolValue)>,
}

impl Record {
    pub fn new(fields: Vec<(String, DynSolValue)>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn fields(&self) -> &[(String, DynSolValue)] {
        &self.fields
    }

    pub fn value(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Read the field called `name` as `T`
    pub fn get<T: FromSolValue>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| BindingError::Decode(format!("no output named '{}'", name)))?;
        T::from_sol_value(value.clone())
    }

    /// Read the field at `index` as `T`
    pub fn at<T: FromSolValue>(&self, index: usize) -> Result<T> {
        let (_, value) = self
            .fields
            .get(index)
            .ok_or_else(|| BindingError::Decode(format!("no output at position {}", index)))?;
        T::from_sol_value(value.clone())
    }
}

/// One decoded event parameter
#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    pub name: String,
    pub value: DynSolValue,
    pub indexed: bool,
}

/// A log decoded against an event descriptor, keeping the raw log
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    /// Fields in declared order, indexed or not
    pub fields: Vec<EventField>,
    pub log: LogRecord,
}

impl DecodedEvent {
    pub fn value(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    pub fn get<T: FromSolValue>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| BindingError::Decode(format!("event has no field '{}'", name)))?;
        T::from_sol_value(value.clone())
    }
}

/// 4-byte dispatch tag of a function
pub fn function_selector(function: &Function) -> [u8; 4] {
    function.selector().0
}

/// `topics[0]` of every non-anonymous log of `event`
pub fn event_signature_hash(event: &Event) -> B256 {
    keccak256(event.signature().as_bytes())
}

/// Check and normalise `args` against `params`
pub fn conform_args(params: &[Param], args: Vec<DynSolValue>) -> Result<Vec<DynSolValue>> {
    if args.len() != params.len() {
        return Err(BindingError::ArgumentMismatch(format!(
            "expected {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }

    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (param, arg))| {
            let ty = resolve(param)?;
            values::conform(&ty, arg).map_err(|reason| {
                BindingError::ArgumentMismatch(format!(
                    "argument #{} ('{}' of type '{}'): {}",
                    i + 1,
                    param.name,
                    param.ty,
                    reason
                ))
            })
        })
        .collect()
}

fn resolve(param: &Param) -> Result<DynSolType> {
    param.resolve().map_err(|e| {
        BindingError::InvalidDescriptor(format!("parameter '{}': {}", param.name, e))
    })
}

/// Selector-prefixed calldata for `function(args)`
pub fn encode_call(function: &Function, args: Vec<DynSolValue>) -> Result<Bytes> {
    let args = conform_args(&function.inputs, args).map_err(|e| match e {
        BindingError::ArgumentMismatch(reason) => {
            BindingError::ArgumentMismatch(format!("{}: {}", function.signature(), reason))
        }
        other => other,
    })?;

    function
        .abi_encode_input(&args)
        .map(Bytes::from)
        .map_err(|e| BindingError::ArgumentMismatch(format!("{}: {}", function.signature(), e)))
}

/// Decode the return data of `function`
pub fn decode_result(function: &Function, data: &[u8]) -> Result<DecodedOutput> {
    if function.outputs.is_empty() {
        return Ok(DecodedOutput::Empty);
    }
    if data.is_empty() {
        return Err(BindingError::Decode(format!(
            "{} returned no data but declares {} outputs",
            function.signature(),
            function.outputs.len()
        )));
    }
    if data.len() % 32 != 0 {
        return Err(BindingError::Decode(format!(
            "{} returned {} bytes, not a whole number of words",
            function.signature(),
            data.len()
        )));
    }

    let mut decoded = function
        .abi_decode_output(data, true)
        .map_err(|e| BindingError::Decode(format!("{}: {}", function.signature(), e)))?;

    if decoded.len() != function.outputs.len() {
        return Err(BindingError::Decode(format!(
            "{} decoded {} outputs, expected {}",
            function.signature(),
            decoded.len(),
            function.outputs.len()
        )));
    }

    if decoded.len() == 1 {
        return Ok(DecodedOutput::Value(decoded.remove(0)));
    }

    let fields = function
        .outputs
        .iter()
        .enumerate()
        .zip(decoded)
        .map(|((i, param), value)| (field_name(&param.name, i), value))
        .collect();
    Ok(DecodedOutput::Record(Record::new(fields)))
}

fn field_name(name: &str, position: usize) -> String {
    if name.is_empty() {
        format!("arg{}", position)
    } else {
        name.to_string()
    }
}

/// Decode a raw log against `event`
pub fn decode_log(event: &Event, log: &LogRecord) -> Result<DecodedEvent> {
    let indexed = event.inputs.iter().filter(|input| input.indexed).count();
    let expected_topics = if event.anonymous { indexed } else { indexed + 1 };

    if log.topics.len() != expected_topics {
        return Err(BindingError::Decode(format!(
            "{} expects {} topics, log has {}",
            event.signature(),
            expected_topics,
            log.topics.len()
        )));
    }
    if !event.anonymous && log.topics[0] != event_signature_hash(event) {
        return Err(BindingError::Decode(format!(
            "log topic {} is not the signature hash of {}",
            log.topics[0],
            event.signature()
        )));
    }
    if log.data.len() % 32 != 0 {
        return Err(BindingError::Decode(format!(
            "{} log data is {} bytes, not a whole number of words",
            event.signature(),
            log.data.len()
        )));
    }

    let decoded = event
        .decode_log_parts(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| BindingError::Decode(format!("{}: {}", event.signature(), e)))?;

    let mut indexed_values = decoded.indexed.into_iter();
    let mut body_values = decoded.body.into_iter();
    let mut fields = Vec::with_capacity(event.inputs.len());

    for (i, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            indexed_values.next()
        } else {
            body_values.next()
        };
        let value = value.ok_or_else(|| {
            BindingError::Decode(format!(
                "{} is missing a value for '{}'",
                event.signature(),
                input.name
            ))
        })?;
        fields.push(EventField {
            name: field_name(&input.name, i),
            value,
            indexed: input.indexed,
        });
    }

    Ok(DecodedEvent {
        name: event.name.clone(),
        fields,
        log: log.clone(),
    })
}

/// Topic word used to filter an indexed parameter of type `ty` on `value`.
///
/// Value types occupy their own word; `string` and `bytes` are stored as the
/// keccak-256 of their contents. Indexed arrays and tuples are not supported
/// as filter values.
pub fn topic_for(ty: &DynSolType, value: DynSolValue) -> Result<B256> {
    let value = values::conform(ty, value).map_err(BindingError::ArgumentMismatch)?;
    match &value {
        DynSolValue::String(s) => Ok(keccak256(s.as_bytes())),
        DynSolValue::Bytes(b) => Ok(keccak256(b)),
        DynSolValue::Array(_) | DynSolValue::FixedArray(_) | DynSolValue::Tuple(_) => {
            Err(BindingError::ArgumentMismatch(format!(
                "cannot filter on indexed {} values",
                ty.sol_type_name()
            )))
        }
        other => other.as_word().ok_or_else(|| {
            BindingError::ArgumentMismatch(format!(
                "cannot filter on indexed {} values",
                ty.sol_type_name()
            ))
        }),
    }
}

/// Init code followed by the encoded constructor arguments
pub fn encode_constructor(
    interface: &super::interface::Interface,
    bytecode: &[u8],
    args: Vec<DynSolValue>,
) -> Result<Bytes> {
    let mut code = bytecode.to_vec();
    match interface.constructor() {
        Some(constructor) => {
            let args = conform_args(&constructor.inputs, args)?;
            let encoded = constructor
                .abi_encode_input(&args)
                .map_err(|e| BindingError::ArgumentMismatch(e.to_string()))?;
            code.extend_from_slice(&encoded);
        }
        None if !args.is_empty() => {
            return Err(BindingError::ArgumentMismatch(format!(
                "the interface declares no constructor, got {} arguments",
                args.len()
            )));
        }
        None => {}
    }
    Ok(Bytes::from(code))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers that build well-formed return data and logs

    use super::*;

    pub(crate) fn encode_output(function: &Function, values: &[DynSolValue]) -> Bytes {
        Bytes::from(function.abi_encode_output(values).unwrap())
    }

    /// Synthesise the log `event` would emit for `values` (declared order)
    pub(crate) fn encode_log(event: &Event, values: &[DynSolValue]) -> LogRecord {
        let mut topics = Vec::new();
        if !event.anonymous {
            topics.push(event_signature_hash(event));
        }
        let mut body = Vec::new();
        for (input, value) in event.inputs.iter().zip(values) {
            if input.indexed {
                let ty = input.resolve().unwrap();
                topics.push(topic_for(&ty, value.clone()).unwrap());
            } else {
                body.push(value.clone());
            }
        }
        LogRecord {
            topics,
            data: Bytes::from(DynSolValue::Tuple(body).abi_encode_params()),
            ..Default::default()
        }
    }
}
