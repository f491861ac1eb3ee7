use alloy::{
    network::EthereumWallet,
    primitives::{Address, TxHash},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};

use super::{provider::AlloyProvider, ChainProvider, ChainSigner, Connector};
use crate::config::Config;

/// Parses a hex private key, with or without `0x`.
pub fn parse_private_key(private_key: &str) -> Result<PrivateKeySigner> {
    let private_key = private_key.trim();
    let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);
    PrivateKeySigner::from_str(private_key).map_err(|e| anyhow!("Invalid private key: {}", e))
}

/// A local key bound to one chain's RPC endpoint.
pub struct LocalSigner {
    wallet: EthereumWallet,
    address: Address,
    rpc_url: String,
    provider: AlloyProvider<alloy::transports::http::Http<alloy::transports::http::Client>>,
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .field("chain_id", &self.provider.chain_id())
            .finish()
    }
}

impl LocalSigner {
    pub fn new(signer: PrivateKeySigner, rpc_url: &str, chain_id: u64) -> Result<Self> {
        let address = signer.address();
        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
            rpc_url: rpc_url.to_string(),
            provider: AlloyProvider::http(rpc_url, chain_id, Duration::from_secs(4))?,
        })
    }
}

#[async_trait]
impl ChainSigner for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        self.provider.chain_id()
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        let mut tx = tx.clone();
        tx.from = Some(self.address);
        self.provider.estimate_gas(&tx).await
    }

    async fn send_transaction(&self, mut tx: TransactionRequest) -> Result<TxHash> {
        tx.from = Some(self.address);
        tx.chain_id = Some(self.chain_id());

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", self.rpc_url, e))?;
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(url);

        let pending = provider.send_transaction(tx).await?;
        let hash = *pending.tx_hash();
        tracing::info!("Transaction sent with hash: {:?}", hash);
        Ok(hash)
    }

    async fn resolve_name(&self, name: &str) -> Result<Address> {
        self.provider.resolve_name(name).await
    }
}

/// Connector over a single private key, one signer per configured chain.
pub struct LocalConnector {
    private_key: PrivateKeySigner,
    endpoints: HashMap<u64, String>,
    default_chain_id: u64,
    active: Mutex<Option<u64>>,
}

impl fmt::Debug for LocalConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalConnector")
            .field("address", &self.private_key.address())
            .field("active", &*self.active.lock())
            .finish()
    }
}

impl LocalConnector {
    pub fn new(private_key: &str, config: &Config) -> Result<Self> {
        let (_, default) = config.network(None)?;
        Ok(Self {
            private_key: parse_private_key(private_key)?,
            endpoints: config
                .networks
                .values()
                .map(|n| (n.chain_id, n.rpc_url.clone()))
                .collect(),
            default_chain_id: default.chain_id,
            active: Mutex::new(None),
        })
    }

    fn signer_for(&self, chain_id: u64) -> Result<Arc<dyn ChainSigner>> {
        let rpc_url = self
            .endpoints
            .get(&chain_id)
            .ok_or_else(|| anyhow!("No RPC endpoint configured for chain {}", chain_id))?;
        let signer = LocalSigner::new(self.private_key.clone(), rpc_url, chain_id)?;
        *self.active.lock() = Some(chain_id);
        Ok(Arc::new(signer))
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn id(&self) -> &str {
        "local"
    }

    fn name(&self) -> &str {
        "Local key"
    }

    async fn connect(&self, chain_id: Option<u64>) -> Result<Arc<dyn ChainSigner>> {
        self.signer_for(chain_id.unwrap_or(self.default_chain_id))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<Arc<dyn ChainSigner>> {
        self.signer_for(chain_id)
    }

    async fn disconnect(&self) -> Result<()> {
        *self.active.lock() = None;
        Ok(())
    }
}
