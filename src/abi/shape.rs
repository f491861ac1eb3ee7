//! Projection of ABI entries onto the shapes callers work with.
//!
//! Everything here is derived from the ABI data at runtime: which functions
//! are readable or writable, how many arguments a call takes, and what each
//! argument or return value looks like once decoded. The 0/1/N collapsing rule
//! lives in [`ArgumentShape`]: no inputs means no argument, one input is passed
//! as the bare value, two or more are passed as an ordered sequence.

use alloy::json_abi::{Event, Function, JsonAbi, Param, StateMutability};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContractError, Result};

/// Whether a function reads chain state or writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutabilityClass {
    Read,
    Write,
}

impl MutabilityClass {
    pub fn of(mutability: StateMutability) -> Self {
        match mutability {
            StateMutability::Pure | StateMutability::View => Self::Read,
            StateMutability::NonPayable | StateMutability::Payable => Self::Write,
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

pub fn mutability_label(mutability: StateMutability) -> &'static str {
    match mutability {
        StateMutability::Pure => "pure",
        StateMutability::View => "view",
        StateMutability::NonPayable => "nonpayable",
        StateMutability::Payable => "payable",
    }
}

/// Number of parameters in an input or output list, collapsed the same way
/// [`ArgumentShape`] collapses values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Zero,
    One,
    Many(usize),
}

impl Arity {
    pub fn of(len: usize) -> Self {
        match len {
            0 => Self::Zero,
            1 => Self::One,
            n => Self::Many(n),
        }
    }

    pub fn len(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Many(n) => n,
        }
    }
}

/// Elementary Solidity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Address,
    Bool,
    String,
    Bytes,
    FixedBytes(usize),
    Uint(usize),
    Int(usize),
    Function,
}

/// Shape of a single decoded value, walked from an ABI parameter.
///
/// Tuples whose components are all named (and unique) become records keyed
/// by component name; anything else stays positional.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueShape {
    Scalar(ScalarType),
    Array(Box<ValueShape>),
    FixedArray(Box<ValueShape>, usize),
    Tuple(Vec<ValueShape>),
    Record(Vec<(String, ValueShape)>),
}

impl ValueShape {
    pub fn from_param(param: &Param) -> Result<Self> {
        Self::parse(&param.ty, &param.components)
    }

    /// Parses a type string such as `uint256`, `tuple[2][]` or `bytes32`.
    /// `components` is only consulted for tuple types.
    pub fn parse(ty: &str, components: &[Param]) -> Result<Self> {
        let ty = ty.trim();
        if let Some(stripped) = ty.strip_suffix(']') {
            let open = stripped
                .rfind('[')
                .ok_or_else(|| ContractError::UnsupportedType(ty.to_string()))?;
            let inner = Self::parse(&stripped[..open], components)?;
            let size = &stripped[open + 1..];
            return if size.is_empty() {
                Ok(Self::Array(Box::new(inner)))
            } else {
                let size = size
                    .parse::<usize>()
                    .map_err(|_| ContractError::UnsupportedType(ty.to_string()))?;
                Ok(Self::FixedArray(Box::new(inner), size))
            };
        }

        if ty == "tuple" || (ty.starts_with('(') && ty.ends_with(')') && !components.is_empty()) {
            return Self::tuple(components);
        }

        scalar(ty).map(Self::Scalar)
    }

    fn tuple(components: &[Param]) -> Result<Self> {
        let names_usable = !components.is_empty()
            && components.iter().all(|c| !c.name.is_empty())
            && components
                .iter()
                .enumerate()
                .all(|(i, c)| components[..i].iter().all(|prev| prev.name != c.name));

        if names_usable {
            let fields = components
                .iter()
                .map(|c| Ok((c.name.clone(), Self::from_param(c)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::Record(fields))
        } else {
            let items = components
                .iter()
                .map(Self::from_param)
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::Tuple(items))
        }
    }
}

fn scalar(ty: &str) -> Result<ScalarType> {
    let unsupported = || ContractError::UnsupportedType(ty.to_string());
    let bits = |digits: &str| -> Result<usize> {
        if digits.is_empty() {
            return Ok(256);
        }
        match digits.parse::<usize>() {
            Ok(n) if n > 0 && n <= 256 && n % 8 == 0 => Ok(n),
            _ => Err(unsupported()),
        }
    };

    match ty {
        "address" => Ok(ScalarType::Address),
        "bool" => Ok(ScalarType::Bool),
        "string" => Ok(ScalarType::String),
        "bytes" => Ok(ScalarType::Bytes),
        "function" => Ok(ScalarType::Function),
        _ => {
            if let Some(rest) = ty.strip_prefix("uint") {
                bits(rest).map(ScalarType::Uint)
            } else if let Some(rest) = ty.strip_prefix("int") {
                bits(rest).map(ScalarType::Int)
            } else if let Some(rest) = ty.strip_prefix("bytes") {
                match rest.parse::<usize>() {
                    Ok(n) if (1..=32).contains(&n) => Ok(ScalarType::FixedBytes(n)),
                    _ => Err(unsupported()),
                }
            } else {
                Err(unsupported())
            }
        }
    }
}

/// Argument (or return) values collapsed by count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ArgumentShape {
    /// No values.
    #[default]
    Empty,
    /// Exactly one value: a scalar, an array, or a record for struct inputs.
    Single(Value),
    /// Two or more values, in declaration order.
    Many(Vec<Value>),
}

impl ArgumentShape {
    /// Collapses positional values by count.
    pub fn collapse(mut values: Vec<Value>) -> Self {
        match values.len() {
            0 => Self::Empty,
            1 => Self::Single(values.remove(0)),
            _ => Self::Many(values),
        }
    }

    /// Spreads the shape into positional call parameters.
    ///
    /// `Single(v)` and `Many(vec![v])` produce the same parameter list.
    pub fn into_params(self) -> Vec<Value> {
        match self {
            Self::Empty => Vec::new(),
            Self::Single(value) => vec![value],
            Self::Many(values) => values,
        }
    }

    pub fn to_params(&self) -> Vec<Value> {
        self.clone().into_params()
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Single(value) => value,
            Self::Many(values) => Value::Array(values),
        }
    }

    /// Interprets untyped JSON arguments for `function`.
    ///
    /// This is the permissive entry point for ABIs loaded at runtime. A
    /// one-element array is accepted in place of the bare value for
    /// one-input functions, and an object is mapped onto the inputs by name
    /// for multi-input functions.
    pub fn from_json(value: Value, function: &Function) -> Result<Self> {
        let inputs = &function.inputs;
        match (value, inputs.len()) {
            (Value::Null, _) => Ok(Self::Empty),
            (Value::Array(values), 0) if values.is_empty() => Ok(Self::Empty),
            (value, 1) => {
                let shape = ValueShape::from_param(&inputs[0])?;
                Ok(Self::Single(unwrap_single(value, &shape)))
            }
            (Value::Array(values), _) => Ok(Self::collapse(values)),
            (Value::Object(mut map), n) if n > 1 => {
                let expected: Vec<String> = inputs
                    .iter()
                    .map(|input| format!("{}: {}", input.name, input.ty))
                    .collect();
                let values = inputs
                    .iter()
                    .map(|input| {
                        map.remove(&input.name).ok_or_else(|| {
                            ContractError::InvalidArguments {
                                function_name: function.name.clone(),
                                reason: format!(
                                    "missing parameter '{}' of type '{}', expected {{{}}}",
                                    input.name,
                                    input.ty,
                                    expected.join(", ")
                                ),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Many(values))
            }
            (value, _) => Ok(Self::Single(value)),
        }
    }
}

/// Strips a one-element wrapper around the single argument of a one-input
/// function, unless the wrapper is itself the argument.
fn unwrap_single(value: Value, shape: &ValueShape) -> Value {
    let strip = match (&value, shape) {
        (Value::Array(values), _) if values.len() != 1 => false,
        (Value::Array(_), ValueShape::Scalar(_)) => true,
        (Value::Array(values), ValueShape::Tuple(_) | ValueShape::Record(_)) => {
            matches!(values[0], Value::Array(_) | Value::Object(_))
        }
        (Value::Array(values), _) => fits(&values[0], shape) && !fits(&value, shape),
        _ => false,
    };

    match value {
        Value::Array(mut values) if strip => values.remove(0),
        value => value,
    }
}

/// Whether `value` has the nesting of `shape`. Scalars are not inspected.
fn fits(value: &Value, shape: &ValueShape) -> bool {
    match (shape, value) {
        (ValueShape::Scalar(_), value) => !matches!(value, Value::Array(_) | Value::Object(_)),
        (ValueShape::Array(inner), Value::Array(items)) => {
            items.iter().all(|item| fits(item, inner))
        }
        (ValueShape::FixedArray(inner, size), Value::Array(items)) => {
            items.len() == *size && items.iter().all(|item| fits(item, inner))
        }
        (ValueShape::Tuple(components), Value::Array(items)) => {
            items.len() == components.len()
                && items.iter().zip(components).all(|(item, shape)| fits(item, shape))
        }
        (ValueShape::Record(fields), Value::Array(items)) => {
            items.len() == fields.len()
                && items.iter().zip(fields).all(|(item, (_, shape))| fits(item, shape))
        }
        (ValueShape::Record(fields), Value::Object(map)) => fields
            .iter()
            .all(|(name, shape)| map.get(name).is_some_and(|item| fits(item, shape))),
        (ValueShape::Tuple(_), Value::Object(_)) => true,
        _ => false,
    }
}

/// A function selected from an ABI together with its projected properties.
#[derive(Debug, Clone, Copy)]
pub struct FunctionShape<'a> {
    pub function: &'a Function,
    pub class: MutabilityClass,
}

impl<'a> FunctionShape<'a> {
    pub fn new(function: &'a Function) -> Self {
        Self {
            function,
            class: MutabilityClass::of(function.state_mutability),
        }
    }

    pub fn inputs(&self) -> Arity {
        Arity::of(self.function.inputs.len())
    }

    pub fn outputs(&self) -> Arity {
        Arity::of(self.function.outputs.len())
    }

    pub fn input_shapes(&self) -> Result<Vec<ValueShape>> {
        self.function.inputs.iter().map(ValueShape::from_param).collect()
    }

    pub fn output_shapes(&self) -> Result<Vec<ValueShape>> {
        self.function.outputs.iter().map(ValueShape::from_param).collect()
    }

    /// Strict mutability check for callers that want one.
    pub fn ensure(&self, class: MutabilityClass) -> Result<()> {
        if self.class == class {
            return Ok(());
        }
        Err(ContractError::MutabilityMismatch {
            function_name: self.function.name.clone(),
            mutability: mutability_label(self.function.state_mutability),
            operation: class.operation(),
        })
    }
}

/// Outcome of looking a function up by name.
#[derive(Debug, Clone)]
pub enum Selection<'a> {
    Found(FunctionShape<'a>),
    Missing,
    /// Several overloads match and the arity did not settle it.
    Ambiguous(Vec<&'a Function>),
}

impl<'a> Selection<'a> {
    pub fn found(self) -> Option<FunctionShape<'a>> {
        match self {
            Self::Found(shape) => Some(shape),
            _ => None,
        }
    }
}

/// Looks up `name` in `abi`.
///
/// `name` is either a bare function name or a full signature such as
/// `mint(uint256)`. Overloads of a bare name are narrowed down by `arity`
/// when one is known.
pub fn select_function<'a>(abi: &'a JsonAbi, name: &str, arity: Option<usize>) -> Selection<'a> {
    if let Some(open) = name.find('(') {
        let bare = &name[..open];
        let signature: String = name.chars().filter(|c| !c.is_whitespace()).collect();
        return abi
            .function(bare)
            .and_then(|overloads| overloads.iter().find(|f| f.signature() == signature))
            .map(|f| Selection::Found(FunctionShape::new(f)))
            .unwrap_or(Selection::Missing);
    }

    let overloads = match abi.function(name) {
        Some(overloads) if !overloads.is_empty() => overloads,
        _ => return Selection::Missing,
    };
    if overloads.len() == 1 {
        return Selection::Found(FunctionShape::new(&overloads[0]));
    }

    let candidates: Vec<&Function> = match arity {
        Some(n) => overloads.iter().filter(|f| f.inputs.len() == n).collect(),
        None => overloads.iter().collect(),
    };
    match candidates.as_slice() {
        [only] => Selection::Found(FunctionShape::new(only)),
        [] => Selection::Missing,
        _ => Selection::Ambiguous(candidates),
    }
}

pub fn select_event<'a>(abi: &'a JsonAbi, name: &str) -> Option<&'a Event> {
    if let Some(open) = name.find('(') {
        let signature: String = name.chars().filter(|c| !c.is_whitespace()).collect();
        return abi
            .event(&name[..open])
            .and_then(|events| events.iter().find(|e| e.signature() == signature));
    }
    abi.event(name).and_then(|events| events.first())
}

/// Names of the functions callable through the given operation.
pub fn function_names(abi: &JsonAbi, class: MutabilityClass) -> Vec<&str> {
    let mut names: Vec<&str> = abi
        .functions()
        .filter(|f| MutabilityClass::of(f.state_mutability) == class)
        .map(|f| f.name.as_str())
        .collect();
    names.dedup();
    names
}

pub fn event_names(abi: &JsonAbi) -> Vec<&str> {
    abi.events().map(|e| e.name.as_str()).collect()
}
