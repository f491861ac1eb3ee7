//! Read, prepare, write and watch operations against a [`Client`].

pub mod normalize;
pub mod prepare;
pub mod read;
pub mod watch_event;
pub mod watch_read;
pub mod write;

use std::{fmt, sync::Arc};

use alloy::json_abi::JsonAbi;
use parking_lot::Mutex;

use crate::{
    abi::{mutability_label, select_function, ArgumentShape, FunctionShape, MutabilityClass, Selection},
    contract::{AddressOrName, CallOverrides},
    error::{ContractError, Result},
};

pub use normalize::{normalize_output, parse_contract_result};
pub use prepare::{
    prepare_write_contract, prepare_write_contract_typed, PrepareWriteContractResult,
    PreparedWriteRequest, RequestMode,
};
pub use read::{read_contract, read_contract_typed, ReadOutput};
pub use watch_event::{watch_contract_event, WatchContractEventConfig};
pub use watch_read::{watch_block_number, watch_read_contract, WatchReadOptions};
pub use write::{
    wait_for_transaction, write_contract, SendTransactionResult, WriteContractConfig, WriteMode,
};

/// Everything needed to call one contract function.
#[derive(Debug, Clone)]
pub struct ContractCallConfig {
    pub address: AddressOrName,
    pub abi: Arc<JsonAbi>,
    /// Bare name or full signature.
    pub function_name: String,
    pub args: ArgumentShape,
    /// Target chain, the active one when unset.
    pub chain_id: Option<u64>,
    pub overrides: Option<CallOverrides>,
}

impl ContractCallConfig {
    pub fn new(
        address: impl Into<AddressOrName>,
        abi: Arc<JsonAbi>,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            abi,
            function_name: function_name.into(),
            args: ArgumentShape::Empty,
            chain_id: None,
            overrides: None,
        }
    }

    pub fn args(mut self, args: ArgumentShape) -> Self {
        self.args = args;
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn overrides(mut self, overrides: CallOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Looks the function up by name and argument count.
    pub(crate) fn select(&self, explorer_url: Option<String>) -> Result<FunctionShape<'_>> {
        match select_function(&self.abi, &self.function_name, Some(self.args.len())) {
            Selection::Found(shape) => Ok(shape),
            Selection::Missing => Err(ContractError::ContractMethodDoesNotExist {
                address: self.address.to_string(),
                function_name: self.function_name.clone(),
                explorer_url,
            }),
            Selection::Ambiguous(candidates) => Err(ContractError::AmbiguousFunction {
                address: self.address.to_string(),
                function_name: self.function_name.clone(),
                candidates: candidates.iter().map(|f| f.signature()).collect(),
            }),
        }
    }
}

/// Mutability mismatches are tolerated at the dynamic boundary.
pub(crate) fn warn_on_mismatch(shape: &FunctionShape<'_>, expected: MutabilityClass, address: &AddressOrName) {
    if shape.class != expected {
        tracing::warn!(
            function = %shape.function.name,
            %address,
            mutability = mutability_label(shape.function.state_mutability),
            "function mutability does not match the {:?} path, proceeding anyway",
            expected
        );
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Stops a watcher. Only the first call does anything; dropping also stops.
pub struct Unwatch {
    teardown: Mutex<Option<Teardown>>,
}

impl Unwatch {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub fn unwatch(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_active(&self) -> bool {
        self.teardown.lock().is_some()
    }
}

impl fmt::Debug for Unwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unwatch")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Unwatch {
    fn drop(&mut self) {
        self.unwatch();
    }
}
