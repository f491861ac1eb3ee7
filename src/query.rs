//! Cached reads and prepared writes.
//!
//! Entries are addressed by [`CacheKey`], which describes the call rather
//! than the objects used to build it: two configs holding different copies of
//! the same ABI share one entry. Concurrent fetches of one key share a single
//! in-flight request.

use std::{fmt, sync::Arc, time::Duration};

use alloy::primitives::Address;
use async_trait::async_trait;
use futures::future::BoxFuture;
use moka::future::Cache as MokaCache;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    abi::{select_function, value},
    actions::{
        parse_contract_result, prepare_write_contract, read_contract, watch_block_number,
        ContractCallConfig, PrepareWriteContractResult, Unwatch,
    },
    client::{Client, ClientState},
    config::CacheConfig,
    error::{ContractError, Result},
};

/// Structural identity of a cached operation. The ABI itself is left out;
/// only the selected function's signature takes part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub entity: &'static str,
    pub address: String,
    /// Canonical JSON of the coerced arguments, so `"7"`, `7` and `["7"]`
    /// share a key.
    pub args: String,
    pub chain_id: u64,
    pub function: String,
    pub overrides: Option<String>,
    pub block_number: Option<u64>,
    pub signer: Option<Address>,
}

impl CacheKey {
    pub fn for_call(entity: &'static str, config: &ContractCallConfig, chain_id: u64) -> Self {
        let selected =
            select_function(&config.abi, &config.function_name, Some(config.args.len())).found();
        let function = selected
            .map(|shape| shape.function.signature())
            .unwrap_or_else(|| config.function_name.clone());
        let args = selected
            .and_then(|shape| value::encode_arguments(shape.function, &config.args).ok())
            .map(|values| Value::Array(values.iter().map(value::plain).collect()))
            .unwrap_or_else(|| Value::Array(config.args.to_params()));

        Self {
            entity,
            address: config.address.to_string(),
            args: args.to_string(),
            chain_id,
            function,
            overrides: config
                .overrides
                .as_ref()
                .and_then(|o| serde_json::to_string(o).ok()),
            block_number: None,
            signer: None,
        }
    }

    pub fn at_block(mut self, block_number: Option<u64>) -> Self {
        self.block_number = block_number;
        self
    }

    pub fn with_signer(mut self, signer: Address) -> Self {
        self.signer = Some(signer);
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.entity, self.chain_id, self.address, self.function)?;
        if let Some(block) = self.block_number {
            write!(f, "@{block}")?;
        }
        Ok(())
    }
}

/// Key-addressed memoized fetch.
#[async_trait]
pub trait QueryCache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the cached value, or runs `fetch` once for all concurrent
    /// callers of the same key. Failures are not cached.
    async fn get_or_fetch<'a>(&'a self, key: CacheKey, fetch: BoxFuture<'a, Result<V>>) -> Result<V>;

    async fn invalidate(&self, key: &CacheKey);

    fn invalidate_where(&self, predicate: Box<dyn Fn(&CacheKey) -> bool + Send + Sync>) -> Result<()>;
}

/// [`QueryCache`] backed by a moka TinyLFU cache.
pub struct MokaQueryCache<V> {
    cache: MokaCache<CacheKey, V>,
}

impl<V> MokaQueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: MokaCache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_capacity, config.ttl())
    }

    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        self.cache.get(key).await
    }
}

impl<V> fmt::Debug for MokaQueryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MokaQueryCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl<V> QueryCache<V> for MokaQueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get_or_fetch<'a>(&'a self, key: CacheKey, fetch: BoxFuture<'a, Result<V>>) -> Result<V> {
        self.cache
            .try_get_with(key, fetch)
            .await
            .map_err(ContractError::from_shared)
    }

    async fn invalidate(&self, key: &CacheKey) {
        debug!(%key, "invalidating cache entry");
        self.cache.invalidate(key).await;
    }

    fn invalidate_where(&self, predicate: Box<dyn Fn(&CacheKey) -> bool + Send + Sync>) -> Result<()> {
        self.cache
            .invalidate_entries_if(move |key, _| predicate(key))
            .map(|_| ())
            .map_err(|e| ContractError::Provider(anyhow::anyhow!("cache invalidation failed: {e}")))
    }
}

/// A cached contract read.
///
/// With `cache_on_block` the key carries the block number and nothing is
/// fetched until one is known. With `watch` alone the entry is invalidated
/// on every new block under the same key.
#[derive(Debug, Clone)]
pub struct ContractReadQuery {
    config: ContractCallConfig,
    cache_on_block: bool,
    watch: bool,
}

impl ContractReadQuery {
    pub fn new(config: ContractCallConfig) -> Self {
        Self {
            config,
            cache_on_block: false,
            watch: false,
        }
    }

    pub fn cache_on_block(mut self, cache_on_block: bool) -> Self {
        self.cache_on_block = cache_on_block;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn query_key(&self, state: &ClientState, block_number: Option<u64>) -> CacheKey {
        let chain_id = state.chain_id(self.config.chain_id);
        let key = CacheKey::for_call("readContract", &self.config, chain_id);
        if self.cache_on_block {
            key.at_block(block_number)
        } else {
            key
        }
    }

    pub fn is_enabled(&self, block_number: Option<u64>) -> bool {
        !self.cache_on_block || block_number.is_some()
    }

    /// Canonicalized result, or `None` while the query is disabled.
    ///
    /// The cache stores the positional JSON; struct names are applied on the
    /// way out.
    pub async fn fetch(
        &self,
        client: &Client,
        cache: &dyn QueryCache<Value>,
        block_number: Option<u64>,
    ) -> Result<Option<Value>> {
        if !self.is_enabled(block_number) {
            return Ok(None);
        }
        let key = self.query_key(&client.state(), block_number);
        let config = &self.config;
        let raw = cache
            .get_or_fetch(
                key,
                Box::pin(async move {
                    Ok(read_contract(client, config)
                        .await?
                        .map(|output| output.raw_json())
                        .unwrap_or(Value::Null))
                }),
            )
            .await?;

        let parsed = match select_function(&config.abi, &config.function_name, Some(config.args.len())).found() {
            Some(shape) => parse_contract_result(shape.function, raw),
            None => raw,
        };
        Ok(Some(parsed))
    }

    /// Drops the current entry when watching without `cache_on_block`.
    /// Returns whether anything was invalidated.
    pub async fn on_block(&self, state: &ClientState, cache: &dyn QueryCache<Value>) -> bool {
        if !self.watch || self.cache_on_block {
            return false;
        }
        cache.invalidate(&self.query_key(state, None)).await;
        true
    }

    /// Runs [`on_block`](Self::on_block) for every new block until the
    /// returned handle is dropped. `None` unless watching.
    pub fn spawn_block_watch(
        self: Arc<Self>,
        client: &Client,
        cache: Arc<dyn QueryCache<Value>>,
        poll_interval: Duration,
    ) -> Option<Unwatch> {
        if !self.watch {
            return None;
        }
        let chain_id = self.config.chain_id;
        let reader = client.clone();
        Some(watch_block_number(client, chain_id, poll_interval, move |block| {
            let query = self.clone();
            let cache = cache.clone();
            let state = reader.state();
            tokio::spawn(async move {
                if query.on_block(&state, cache.as_ref()).await {
                    debug!(block, function = %query.config.function_name, "read invalidated by new block");
                }
            });
        }))
    }
}

/// A cached prepared write, keyed by the signer that will send it.
#[derive(Debug, Clone)]
pub struct PrepareWriteQuery {
    config: ContractCallConfig,
}

impl PrepareWriteQuery {
    pub fn new(config: ContractCallConfig) -> Self {
        Self { config }
    }

    /// `None` while no signer is connected.
    pub fn query_key(&self, state: &ClientState) -> Option<CacheKey> {
        let signer = state.signer()?;
        Some(
            CacheKey::for_call("prepareWriteContract", &self.config, signer.chain_id())
                .with_signer(signer.address()),
        )
    }

    pub fn is_enabled(&self, state: &ClientState) -> bool {
        state.signer().is_some()
    }

    pub async fn fetch(
        &self,
        client: &Client,
        cache: &dyn QueryCache<PrepareWriteContractResult>,
    ) -> Result<Option<PrepareWriteContractResult>> {
        let state = client.state();
        let (Some(key), Some(signer)) = (self.query_key(&state), state.signer()) else {
            return Ok(None);
        };
        let prepared = cache
            .get_or_fetch(key, Box::pin(prepare_write_contract(client, &self.config, Some(signer))))
            .await?;
        Ok(Some(prepared))
    }
}
