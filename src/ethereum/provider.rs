use crate::client::{Client, ClientBuilder};
use crate::config::{Config, NetworkConfig};
use alloy::{
    eips::BlockId,
    network::ReceiptResponse,
    primitives::{Address, Bytes, TxHash},
    providers::{Provider, ProviderBuilder, RootProvider, WsConnect},
    pubsub::PubSubFrontend,
    rpc::types::{Filter, TransactionRequest},
    transports::{
        http::{Client as HttpClient, Http},
        Transport,
    },
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::{fmt, sync::Arc, time::Duration};

use super::{ens, ChainProvider, LogStream, ProviderKind, TransactionInfo};

pub type HttpProvider = RootProvider<Http<HttpClient>>;
pub type WsProvider = RootProvider<PubSubFrontend>;

/// [`ChainProvider`] over an alloy root provider.
pub struct AlloyProvider<T: Transport + Clone> {
    inner: RootProvider<T>,
    chain_id: u64,
    kind: ProviderKind,
    poll_interval: Duration,
}

impl<T: Transport + Clone> fmt::Debug for AlloyProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlloyProvider")
            .field("chain_id", &self.chain_id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl AlloyProvider<Http<HttpClient>> {
    pub fn http(rpc_url: &str, chain_id: u64, poll_interval: Duration) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", rpc_url, e))?;
        Ok(Self {
            inner: ProviderBuilder::new().on_http(url),
            chain_id,
            kind: ProviderKind::Polling,
            poll_interval,
        })
    }
}

impl AlloyProvider<PubSubFrontend> {
    pub async fn ws(ws_url: &str, chain_id: u64) -> Result<Self> {
        let inner = ProviderBuilder::new()
            .on_ws(WsConnect::new(ws_url))
            .await
            .map_err(|e| anyhow!("Failed to connect to {}: {}", ws_url, e))?;
        Ok(Self {
            inner,
            chain_id,
            kind: ProviderKind::WebSocket,
            poll_interval: Duration::from_secs(1),
        })
    }
}

impl<T: Transport + Clone> AlloyProvider<T> {
    pub fn inner(&self) -> &RootProvider<T> {
        &self.inner
    }
}

#[async_trait]
impl<T> ChainProvider for AlloyProvider<T>
where
    T: Transport + Clone,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn call(&self, tx: &TransactionRequest, block: Option<u64>) -> Result<Bytes> {
        let call = self.inner.call(tx);
        let data = match block {
            Some(number) => call.block(BlockId::number(number)).await?,
            None => call.await?,
        };
        Ok(data)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        Ok(self.inner.estimate_gas(tx).await?)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.inner.get_block_number().await?)
    }

    async fn resolve_name(&self, name: &str) -> Result<Address> {
        ens::resolve(self, name).await
    }

    async fn watch_logs(&self, filter: &Filter) -> Result<LogStream> {
        match self.kind {
            ProviderKind::WebSocket => {
                let subscription = self.inner.subscribe_logs(filter).await?;
                Ok(subscription.into_stream().boxed())
            }
            ProviderKind::Polling => {
                let poller = self
                    .inner
                    .watch_logs(filter)
                    .await?
                    .with_poll_interval(self.poll_interval);
                Ok(poller.into_stream().flat_map(stream::iter).boxed())
            }
        }
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionInfo>> {
        let receipt = self.inner.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|receipt| TransactionInfo {
            hash: receipt.transaction_hash,
            from: receipt.from,
            to: receipt.to,
            gas_used: receipt.gas_used() as u64,
            effective_gas_price: receipt.effective_gas_price,
            block_number: receipt.block_number,
            status: receipt.status(),
        }))
    }
}

/// Builds chain providers from the configured networks.
#[derive(Debug)]
pub struct ProviderManager {
    config: Config,
}

impl ProviderManager {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn create_provider(&self, network: &NetworkConfig) -> Result<Arc<dyn ChainProvider>> {
        Ok(Arc::new(AlloyProvider::http(
            &network.rpc_url,
            network.chain_id,
            self.config.watch.poll_interval(),
        )?))
    }

    /// A client with HTTP providers for every network and socket providers
    /// for the ones that configure `ws_url`. Socket failures degrade to
    /// polling.
    pub async fn build_client(&self) -> Result<Client> {
        let (_, default) = self.config.network(None)?;
        let mut builder: ClientBuilder = Client::builder()
            .chains(self.config.chains())
            .default_chain(default.chain_id);

        for (name, network) in &self.config.networks {
            builder = builder.provider(self.create_provider(network)?);
            if let Some(ws_url) = &network.ws_url {
                match AlloyProvider::ws(ws_url, network.chain_id).await {
                    Ok(provider) => builder = builder.ws_provider(Arc::new(provider)),
                    Err(e) => tracing::warn!(
                        "Socket endpoint for {} unavailable, falling back to polling: {}",
                        name,
                        e
                    ),
                }
            }
        }

        Ok(builder.build())
    }

    /// Validates network connectivity with detailed error information
    pub async fn validate_network_connection(&self, network: Option<&str>) -> Result<()> {
        let (name, network) = self.config.network(network)?;
        let provider = self.create_provider(network)?;
        match provider.block_number().await {
            Ok(block) => {
                tracing::debug!("Network {} reachable at block {}", name, block);
                Ok(())
            }
            Err(e) => Err(anyhow!(
                "Cannot connect to network '{}': {}. Please check your RPC endpoint configuration and network connectivity.",
                name,
                e
            )),
        }
    }
}
