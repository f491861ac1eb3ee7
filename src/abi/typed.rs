//! Compile-time projection of function signatures.
//!
//! A function declared with [`contract_function!`](crate::contract_function)
//! carries its argument and return shapes as Rust types, with the same 0/1/N
//! collapsing as [`ArgumentShape`]: `()` takes nothing, `(A,)` takes a bare
//! `A`, and longer tuples stay tuples. Read and write entry points are bounded
//! on [`ReadFunction`] and [`WriteFunction`], so using a `view` function to
//! write does not compile.
//!
//! Values cross into the dynamic layer through `serde_json`, so the runtime
//! path is the same one a runtime-loaded ABI takes.

use alloy::json_abi::{Function, JsonAbi};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::shape::ArgumentShape;
use crate::error::{ContractError, Result};

/// A parameter list expressed as a Rust tuple type.
pub trait AbiParams {
    /// The collapsed value callers pass or receive.
    type Value;

    const ARITY: usize;

    fn to_shape(value: &Self::Value) -> serde_json::Result<ArgumentShape>;

    fn from_shape(shape: ArgumentShape) -> serde_json::Result<Self::Value>;
}

fn arity_error(expected: usize, got: usize) -> serde_json::Error {
    <serde_json::Error as serde::de::Error>::custom(format!(
        "expected {expected} value(s), got {got}"
    ))
}

impl AbiParams for () {
    type Value = ();
    const ARITY: usize = 0;

    fn to_shape(_: &()) -> serde_json::Result<ArgumentShape> {
        Ok(ArgumentShape::Empty)
    }

    fn from_shape(shape: ArgumentShape) -> serde_json::Result<()> {
        match shape.len() {
            0 => Ok(()),
            n => Err(arity_error(0, n)),
        }
    }
}

impl<A> AbiParams for (A,)
where
    A: Serialize + DeserializeOwned,
{
    type Value = A;
    const ARITY: usize = 1;

    fn to_shape(value: &A) -> serde_json::Result<ArgumentShape> {
        Ok(ArgumentShape::Single(serde_json::to_value(value)?))
    }

    fn from_shape(shape: ArgumentShape) -> serde_json::Result<A> {
        match shape {
            ArgumentShape::Single(value) => serde_json::from_value(value),
            ArgumentShape::Many(mut values) if values.len() == 1 => {
                serde_json::from_value(values.remove(0))
            }
            other => Err(arity_error(1, other.len())),
        }
    }
}

macro_rules! impl_abi_params {
    ($arity:literal => $($ty:ident : $idx:tt),+) => {
        impl<$($ty),+> AbiParams for ($($ty,)+)
        where
            $($ty: Serialize + DeserializeOwned,)+
        {
            type Value = ($($ty,)+);
            const ARITY: usize = $arity;

            fn to_shape(value: &Self::Value) -> serde_json::Result<ArgumentShape> {
                Ok(ArgumentShape::Many(vec![$(serde_json::to_value(&value.$idx)?),+]))
            }

            fn from_shape(shape: ArgumentShape) -> serde_json::Result<Self::Value> {
                let values = shape.into_params();
                if values.len() != $arity {
                    return Err(arity_error($arity, values.len()));
                }
                let mut values = values.into_iter();
                Ok(($(
                    serde_json::from_value::<$ty>(values.next().unwrap_or(Value::Null))?,
                )+))
            }
        }
    };
}

impl_abi_params!(2 => A: 0, B: 1);
impl_abi_params!(3 => A: 0, B: 1, C: 2);
impl_abi_params!(4 => A: 0, B: 1, C: 2, D: 3);
impl_abi_params!(5 => A: 0, B: 1, C: 2, D: 3, E: 4);
impl_abi_params!(6 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// A contract function known at compile time.
pub trait AbiFunction {
    /// Human-readable signature, e.g.
    /// `function balanceOf(address owner) view returns (uint256)`.
    const SIGNATURE: &'static str;

    type Inputs: AbiParams;
    type Outputs: AbiParams;

    fn function() -> Result<Function> {
        Function::parse(Self::SIGNATURE)
            .map_err(|e| ContractError::InvalidAbi(format!("{}: {e}", Self::SIGNATURE)))
    }

    /// A one-entry ABI holding just this function.
    fn abi() -> Result<JsonAbi> {
        let function = Self::function()?;
        let mut abi = JsonAbi::new();
        abi.functions
            .entry(function.name.clone())
            .or_default()
            .push(function);
        Ok(abi)
    }
}

/// Functions declared `pure` or `view`.
pub trait ReadFunction: AbiFunction {}

/// Functions declared `nonpayable` or `payable`.
pub trait WriteFunction: AbiFunction {}

pub type FunctionArgs<F> = <<F as AbiFunction>::Inputs as AbiParams>::Value;
pub type FunctionOutput<F> = <<F as AbiFunction>::Outputs as AbiParams>::Value;

pub fn encode_args<F: AbiFunction>(args: &FunctionArgs<F>) -> Result<ArgumentShape> {
    <F::Inputs as AbiParams>::to_shape(args).map_err(|e| ContractError::InvalidArguments {
        function_name: F::SIGNATURE.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_output<F: AbiFunction>(output: ArgumentShape) -> Result<FunctionOutput<F>> {
    <F::Outputs as AbiParams>::from_shape(output).map_err(|e| {
        ContractError::InvalidArguments {
            function_name: F::SIGNATURE.to_string(),
            reason: format!("unexpected return value: {e}"),
        }
    })
}

/// Declares a typed contract function.
///
/// ```ignore
/// contract_function!(
///     pub BalanceOf: read "function balanceOf(address owner) view returns (uint256)",
///     (Address,) => (U256,)
/// );
/// ```
#[macro_export]
macro_rules! contract_function {
    (@declare $vis:vis $name:ident, $sig:literal, $inputs:ty, $outputs:ty) => {
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl $crate::abi::typed::AbiFunction for $name {
            const SIGNATURE: &'static str = $sig;
            type Inputs = $inputs;
            type Outputs = $outputs;
        }
    };
    ($vis:vis $name:ident : read $sig:literal, $inputs:ty => $outputs:ty) => {
        $crate::contract_function!(@declare $vis $name, $sig, $inputs, $outputs);
        impl $crate::abi::typed::ReadFunction for $name {}
    };
    ($vis:vis $name:ident : write $sig:literal, $inputs:ty => $outputs:ty) => {
        $crate::contract_function!(@declare $vis $name, $sig, $inputs, $outputs);
        impl $crate::abi::typed::WriteFunction for $name {}
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::shape::{select_function, MutabilityClass};
    use alloy::primitives::{Address, U256};
    use serde_json::json;

    contract_function!(
        BalanceOf: read "function balanceOf(address owner) view returns (uint256)",
        (Address,) => (U256,)
    );
    contract_function!(
        GetPair: read "function getPair() view returns (uint256 amount, string label)",
        () => (U256, String)
    );
    contract_function!(Mint: write "function mint()", () => ());

    #[test]
    fn single_params_collapse_to_the_bare_value() {
        let owner = Address::repeat_byte(0x11);
        let shape = encode_args::<BalanceOf>(&owner).unwrap();
        assert_eq!(shape, ArgumentShape::Single(json!(owner)));

        let balance: U256 =
            decode_output::<BalanceOf>(ArgumentShape::Single(json!("9"))).unwrap();
        assert_eq!(balance, U256::from(9));
    }

    #[test]
    fn multi_outputs_stay_tuples() {
        let (amount, label) = decode_output::<GetPair>(ArgumentShape::Many(vec![
            json!("7"),
            json!("seven"),
        ]))
        .unwrap();
        assert_eq!(amount, U256::from(7));
        assert_eq!(label, "seven");

        let err = decode_output::<GetPair>(ArgumentShape::Single(json!("7"))).unwrap_err();
        assert!(err.to_string().contains("expected 2 value(s), got 1"));
    }

    #[test]
    fn zero_params_take_unit() {
        assert_eq!(encode_args::<Mint>(&()).unwrap(), ArgumentShape::Empty);
        decode_output::<Mint>(ArgumentShape::Empty).unwrap();
        assert_eq!(<<Mint as AbiFunction>::Inputs as AbiParams>::ARITY, 0);
    }

    #[test]
    fn declared_signatures_parse_with_mutability() {
        let abi = BalanceOf::abi().unwrap();
        let shape = select_function(&abi, "balanceOf", None).found().unwrap();
        assert_eq!(shape.class, MutabilityClass::Read);
        assert_eq!(shape.function.signature(), "balanceOf(address)");

        let mint = Mint::function().unwrap();
        assert_eq!(MutabilityClass::of(mint.state_mutability), MutabilityClass::Write);
    }
}
