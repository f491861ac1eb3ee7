pub mod abi;
pub mod ens;
pub mod provider;
pub mod signer;
pub mod utils;

use std::{fmt::Debug, sync::Arc};

use alloy::{
    primitives::{Address, Bytes, TxHash, U256},
    rpc::types::{Filter, Log, TransactionRequest},
};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub type LogStream = BoxStream<'static, Log>;

/// How a provider delivers new logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Filter polling over HTTP.
    Polling,
    /// Push subscriptions over a socket.
    WebSocket,
}

/// Read-only connection to one chain.
#[async_trait]
pub trait ChainProvider: Send + Sync + Debug {
    fn chain_id(&self) -> u64;

    fn kind(&self) -> ProviderKind;

    /// `eth_call` at the given block, or the latest one.
    async fn call(&self, tx: &TransactionRequest, block: Option<u64>) -> Result<Bytes>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    /// Resolves an ENS name to an address.
    async fn resolve_name(&self, name: &str) -> Result<Address>;

    /// Streams logs matching `filter` from now on.
    async fn watch_logs(&self, filter: &Filter) -> Result<LogStream>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionInfo>>;
}

/// An identity able to submit transactions on one chain at a time.
#[async_trait]
pub trait ChainSigner: Send + Sync + Debug {
    fn address(&self) -> Address;

    fn chain_id(&self) -> u64;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    /// Signs and submits `tx`, returning as soon as the node accepts it.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash>;

    async fn resolve_name(&self, name: &str) -> Result<Address>;
}

/// Source of signers. Only one connector is active at a time.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    async fn connect(&self, chain_id: Option<u64>) -> Result<Arc<dyn ChainSigner>>;

    async fn switch_chain(&self, chain_id: u64) -> Result<Arc<dyn ChainSigner>>;

    async fn disconnect(&self) -> Result<()>;
}

/// Summary of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub block_number: Option<u64>,
    pub status: bool,
}

/// Native value attached to a call, parsed from decimal or `0x` hex.
pub fn parse_value(value: &str) -> Result<U256> {
    utils::validate_hex_value(value)
}
