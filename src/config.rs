use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::{actions::PreparedWriteRequest, client::Chain, contract::CallOverrides};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    pub security: SecurityConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    /// Socket endpoint used for event subscriptions when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    pub chain_id: u64,
    /// Human-readable chain label used in error messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub gas: GasConfig,
}

/// Fee defaults and ceiling for writes on one network, in wei.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GasConfig {
    pub max_gas_price: Option<u64>,
    pub priority_fee: Option<u64>,
}

impl GasConfig {
    /// Fills unset EIP-1559 fee fields. A legacy `gas_price` is left alone.
    pub fn apply_defaults(&self, overrides: &mut CallOverrides) {
        if overrides.gas_price.is_some() {
            return;
        }
        if overrides.max_fee_per_gas.is_none() {
            overrides.max_fee_per_gas = self.max_gas_price.map(u128::from);
        }
        if overrides.max_priority_fee_per_gas.is_none() {
            let priority_fee = self.priority_fee.map(u128::from);
            overrides.max_priority_fee_per_gas = match (priority_fee, overrides.max_fee_per_gas) {
                (Some(fee), Some(max)) => Some(fee.min(max)),
                (fee, _) => fee,
            };
        }
    }

    /// Rejects a prepared write priced above `max_gas_price`.
    pub fn check(&self, request: &PreparedWriteRequest) -> Result<()> {
        let Some(max) = self.max_gas_price else {
            return Ok(());
        };
        let price = request.max_fee_per_gas().or(request.gas_price());
        match price {
            Some(price) if price > u128::from(max) => Err(anyhow!(
                "Gas price {} exceeds the configured maximum of {}",
                price,
                max
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub allow_write_operations: bool,
    pub max_transaction_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    /// Blocks to wait after inclusion before a transaction counts as final.
    pub confirmations: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 4_000,
            confirmations: 1,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn network(
    rpc_url: &str,
    chain_id: u64,
    name: &str,
    explorer_url: &str,
    max_gas_price: u64,
    priority_fee: u64,
) -> NetworkConfig {
    NetworkConfig {
        rpc_url: rpc_url.to_string(),
        ws_url: None,
        chain_id,
        name: Some(name.to_string()),
        explorer_url: Some(explorer_url.to_string()),
        gas: GasConfig {
            max_gas_price: Some(max_gas_price),
            priority_fee: Some(priority_fee),
        },
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            network(
                "https://eth-mainnet.g.alchemy.com/v2/demo",
                1,
                "Ethereum",
                "https://etherscan.io",
                50_000_000_000,
                2_000_000_000,
            ),
        );
        networks.insert(
            "sepolia".to_string(),
            network(
                "https://eth-sepolia.g.alchemy.com/v2/demo",
                11155111,
                "Sepolia",
                "https://sepolia.etherscan.io",
                20_000_000_000,
                1_000_000_000,
            ),
        );
        networks.insert(
            "polygon".to_string(),
            network(
                "https://polygon-mainnet.g.alchemy.com/v2/demo",
                137,
                "Polygon",
                "https://polygonscan.com",
                500_000_000_000,
                30_000_000_000,
            ),
        );
        networks.insert(
            "arbitrum".to_string(),
            network(
                "https://arb-mainnet.g.alchemy.com/v2/demo",
                42161,
                "Arbitrum One",
                "https://arbiscan.io",
                5_000_000_000,
                100_000_000,
            ),
        );

        Self {
            networks,
            default_network: "ethereum".to_string(),
            security: SecurityConfig {
                allow_write_operations: false,
                max_transaction_value: None,
            },
            cache: CacheConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    fn validate(&self) -> Result<()> {
        if !self.networks.contains_key(&self.default_network) {
            return Err(anyhow!(
                "Default network '{}' is not configured",
                self.default_network
            ));
        }
        let mut seen = HashMap::new();
        for (name, network) in &self.networks {
            if let Some(other) = seen.insert(network.chain_id, name) {
                return Err(anyhow!(
                    "Networks '{}' and '{}' share chain id {}",
                    other,
                    name,
                    network.chain_id
                ));
            }
        }
        Ok(())
    }

    /// Apply environment variable substitutions to configuration
    fn apply_env_vars(&mut self) {
        if let Ok(api_key) = std::env::var("ALCHEMY_API_KEY") {
            tracing::info!("Using ALCHEMY_API_KEY environment variable for RPC URLs");
            for (network_name, network_config) in &mut self.networks {
                for url in std::iter::once(&mut network_config.rpc_url)
                    .chain(network_config.ws_url.as_mut())
                {
                    if url.contains("alchemy.com/v2/demo") {
                        *url = url.replace("/demo", &format!("/{}", api_key));
                    } else if url.contains("YOUR_API_KEY_HERE") {
                        *url = url.replace("YOUR_API_KEY_HERE", &api_key);
                    }
                }
                tracing::debug!("Updated {} endpoints with API key", network_name);
            }
        } else {
            for (network_name, network_config) in &self.networks {
                if network_config.rpc_url.contains("/demo") {
                    tracing::warn!("Using demo RPC endpoint for {}, set ALCHEMY_API_KEY environment variable for better reliability", network_name);
                }
            }
        }

        if std::env::var("ETHERSCAN_API_KEY").is_ok() {
            tracing::debug!("ETHERSCAN_API_KEY found, will be used for ABI resolution");
        }
    }

    /// Signing key for write commands, read from `PRIVATE_KEY`.
    pub fn private_key() -> Option<String> {
        std::env::var("PRIVATE_KEY").ok().filter(|k| !k.trim().is_empty())
    }

    pub fn network(&self, name: Option<&str>) -> Result<(&str, &NetworkConfig)> {
        let name = name.unwrap_or(&self.default_network);
        self.networks
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| anyhow!("Network '{}' not configured", name))
    }

    pub fn available_networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Chain registry derived from the configured networks.
    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self
            .networks
            .iter()
            .map(|(key, network)| Chain {
                id: network.chain_id,
                name: network.name.clone().unwrap_or_else(|| key.clone()),
                explorer_url: network.explorer_url.clone(),
            })
            .collect();
        chains.sort_by_key(|chain| chain.id);
        chains
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-actions").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# contract-actions configuration file

# Default network to use when none is specified
default_network = "ethereum"

[networks.ethereum]
name = "Ethereum"
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
# Used for event subscriptions; HTTP filter polling is used otherwise
ws_url = "wss://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.ethereum.gas]
max_gas_price = 50_000_000_000  # 50 Gwei
priority_fee = 2_000_000_000    # 2 Gwei

[networks.sepolia]
name = "Sepolia"
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.sepolia.gas]
max_gas_price = 20_000_000_000  # 20 Gwei
priority_fee = 1_000_000_000    # 1 Gwei

[security]
allow_write_operations = false
# max_transaction_value = "1000000000000000000"  # 1 ETH in wei

# Cached reads
[cache]
ttl_secs = 30
max_capacity = 10000

# Block and receipt polling
[watch]
poll_interval_ms = 4000
confirmations = 1

# Environment variables that can be used:
# ALCHEMY_API_KEY - replaces YOUR_API_KEY_HERE above
# ETHERSCAN_API_KEY - explorer key for ABI resolution
# PRIVATE_KEY - signing key for write commands
"#;
        sample_config.to_string()
    }
}
