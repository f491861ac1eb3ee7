//! Typed contract calls over alloy: ABI shape projection, reads, prepared
//! writes, event watching and cached reads against a shared client.

pub mod abi;
pub mod actions;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod ethereum;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

pub use abi::{ArgumentShape, MutabilityClass};
pub use actions::{
    prepare_write_contract, read_contract, watch_contract_event, watch_read_contract,
    write_contract, ContractCallConfig, Unwatch,
};
pub use client::{Chain, Client, ClientState};
pub use config::Config;
pub use contract::{AddressOrName, CallOverrides, Contract, ContractBinding, Runner};
pub use error::{ContractError, Result};
pub use query::{CacheKey, ContractReadQuery, MokaQueryCache, PrepareWriteQuery, QueryCache};
