pub mod shape;
pub mod typed;
pub mod value;

pub use shape::{
    event_names, function_names, mutability_label, select_event, select_function, Arity,
    ArgumentShape, FunctionShape, MutabilityClass, ScalarType, Selection, ValueShape,
};
pub use typed::{AbiFunction, AbiParams, FunctionArgs, FunctionOutput, ReadFunction, WriteFunction};
