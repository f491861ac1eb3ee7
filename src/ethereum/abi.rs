//! ABI loading for the dynamic boundary: local JSON files and explorer lookups.

use alloy::json_abi::JsonAbi;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Where explorer ABIs come from and where they are cached.
#[derive(Debug, Clone)]
pub struct AbiSource {
    pub etherscan_api_key: Option<String>,
    pub cache_dir: PathBuf,
}

impl Default for AbiSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("contract-actions")
            .join("abi-cache");

        Self {
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY").ok(),
            cache_dir,
        }
    }
}

/// Parses an ABI from either a bare JSON array or a compiler artifact with an
/// `abi` field.
pub fn parse_abi(content: &str) -> Result<JsonAbi> {
    let value: Value = serde_json::from_str(content).context("ABI is not valid JSON")?;
    let abi = match value {
        Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| anyhow!("JSON object has no \"abi\" field"))?,
        other => other,
    };
    serde_json::from_value(abi).context("Failed to parse ABI JSON")
}

pub async fn load_abi_file(path: &Path) -> Result<JsonAbi> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read ABI file {}", path.display()))?;
    parse_abi(&content)
}

fn explorer_api(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://api.etherscan.io"),
        11155111 => Some("https://api-sepolia.etherscan.io"),
        17000 => Some("https://api-holesky.etherscan.io"),
        137 => Some("https://api.polygonscan.com"),
        42161 => Some("https://api.arbiscan.io"),
        10 => Some("https://api-optimistic.etherscan.io"),
        8453 => Some("https://api.basescan.org"),
        _ => None,
    }
}

/// Resolves contract ABIs, trying memory, then disk, then the explorer.
#[derive(Debug)]
pub struct AbiResolver {
    client: Client,
    config: AbiSource,
    memory_cache: HashMap<String, Arc<JsonAbi>>,
}

impl AbiResolver {
    pub fn new(config: AbiSource) -> Self {
        Self {
            client: Client::new(),
            config,
            memory_cache: HashMap::new(),
        }
    }

    fn cache_key(address: &str, chain_id: u64) -> String {
        format!("{}_{}", chain_id, address.to_lowercase())
    }

    pub async fn get_abi(&mut self, address: &str, chain_id: u64) -> Result<Arc<JsonAbi>> {
        let cache_key = Self::cache_key(address, chain_id);

        if let Some(abi) = self.memory_cache.get(&cache_key) {
            debug!("ABI cache hit for {}", address);
            return Ok(abi.clone());
        }

        if let Ok(abi) = self.load_cached_abi(&cache_key).await {
            debug!("ABI disk cache hit for {}", address);
            let abi = Arc::new(abi);
            self.memory_cache.insert(cache_key, abi.clone());
            return Ok(abi);
        }

        info!("Fetching ABI from explorer for {} on chain {}", address, chain_id);
        let abi = self.fetch_from_explorer(address, chain_id).await?;

        if let Err(e) = self.cache_abi(&cache_key, &abi).await {
            warn!("Failed to cache ABI for {}: {}", address, e);
        }

        let abi = Arc::new(abi);
        self.memory_cache.insert(cache_key, abi.clone());
        Ok(abi)
    }

    async fn fetch_from_explorer(&self, address: &str, chain_id: u64) -> Result<JsonAbi> {
        let base_url = explorer_api(chain_id)
            .ok_or_else(|| anyhow!("No explorer API known for chain {}", chain_id))?;

        let mut url = format!(
            "{}/api?module=contract&action=getabi&address={}&format=json",
            base_url, address
        );
        if let Some(api_key) = &self.config.etherscan_api_key {
            url.push_str(&format!("&apikey={}", api_key));
        }

        let response: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch from explorer: {}", e))?
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse explorer response: {}", e))?;

        let abi_str = response["result"].as_str().unwrap_or_default();
        if response["status"] != "1" {
            let message = response["message"].as_str().unwrap_or("Unknown error");
            if abi_str.contains("not verified") {
                return Err(anyhow!("Contract source code not verified"));
            }
            return Err(anyhow!("Explorer API error: {} {}", message, abi_str));
        }

        parse_abi(abi_str)
    }

    async fn load_cached_abi(&self, cache_key: &str) -> Result<JsonAbi> {
        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));
        if !cache_path.exists() {
            return Err(anyhow!("Cache file does not exist"));
        }
        load_abi_file(&cache_path).await
    }

    async fn cache_abi(&self, cache_key: &str, abi: &JsonAbi) -> Result<()> {
        fs::create_dir_all(&self.config.cache_dir)
            .await
            .context("Failed to create cache directory")?;

        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));
        let content = serde_json::to_string_pretty(abi).context("Failed to serialize ABI")?;
        fs::write(&cache_path, content)
            .await
            .context("Failed to write cache file")?;

        debug!("Cached ABI to {:?}", cache_path);
        Ok(())
    }

    /// Registers an ABI for an unverified contract.
    pub fn add_manual_abi(&mut self, address: &str, chain_id: u64, abi: JsonAbi) -> Arc<JsonAbi> {
        let abi = Arc::new(abi);
        self.memory_cache
            .insert(Self::cache_key(address, chain_id), abi.clone());
        info!("Added manual ABI for {}", address);
        abi
    }

    pub fn has_abi(&self, address: &str, chain_id: u64) -> bool {
        let cache_key = Self::cache_key(address, chain_id);
        self.memory_cache.contains_key(&cache_key)
            || self
                .config
                .cache_dir
                .join(format!("{}.json", cache_key))
                .exists()
    }
}
