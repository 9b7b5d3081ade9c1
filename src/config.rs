use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    pub security: SecurityConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    /// Named contracts: artifact on disk plus deployed address
    #[serde(default)]
    pub contracts: HashMap<String, ContractEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    pub default_gas_limit: u64,
    pub max_gas_price: Option<u64>,
    pub priority_fee: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub allow_write_operations: bool,
    pub require_confirmation: bool,
    pub max_transaction_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Interval between `eth_getFilterChanges` polls
    pub poll_interval_ms: u64,
    /// Logs buffered per live subscription before the poller waits
    pub buffer: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 4000,
            buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub artifact: PathBuf,
    pub address: Option<String>,
    pub network: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 1,
                explorer_url: Some("https://etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(50_000_000_000), // 50 Gwei
                    priority_fee: Some(2_000_000_000),   // 2 Gwei
                },
            },
        );

        networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-sepolia.g.alchemy.com/v2/demo".to_string(),
                chain_id: 11155111,
                explorer_url: Some("https://sepolia.etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(20_000_000_000), // 20 Gwei
                    priority_fee: Some(1_000_000_000),   // 1 Gwei
                },
            },
        );

        networks.insert(
            "polygon".to_string(),
            NetworkConfig {
                rpc_url: "https://polygon-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 137,
                explorer_url: Some("https://polygonscan.com".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(500_000_000_000), // 500 Gwei
                    priority_fee: Some(30_000_000_000),   // 30 Gwei
                },
            },
        );

        networks.insert(
            "arbitrum".to_string(),
            NetworkConfig {
                rpc_url: "https://arb-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 42161,
                explorer_url: Some("https://arbiscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(5_000_000_000), // 5 Gwei
                    priority_fee: Some(100_000_000),    // 0.1 Gwei
                },
            },
        );

        Self {
            networks,
            default_network: "ethereum".to_string(),
            security: SecurityConfig {
                allow_write_operations: false,
                require_confirmation: true,
                max_transaction_value: None,
            },
            subscription: SubscriptionConfig::default(),
            contracts: HashMap::new(),
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

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        // Create parent directory if it doesn't exist
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

        // Apply environment variable substitutions
        config.apply_env_vars();
        config
    }

    /// Replace the endpoint of one network, as `--rpc-url` does
    pub fn override_rpc_url(&mut self, network: &str, rpc_url: &str) -> Result<()> {
        let network_config = self
            .networks
            .get_mut(network)
            .ok_or_else(|| anyhow!("Network '{}' not configured", network))?;
        network_config.rpc_url = rpc_url.to_string();
        Ok(())
    }

    pub fn contract(&self, name: &str) -> Result<&ContractEntry> {
        self.contracts.get(name).ok_or_else(|| {
            let mut known: Vec<&str> = self.contracts.keys().map(String::as_str).collect();
            known.sort();
            anyhow!(
                "Contract '{}' is not registered. Known contracts: {}",
                name,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )
        })
    }

    /// Apply environment variable substitutions to configuration
    fn apply_env_vars(&mut self) {
        // Check for ALCHEMY_API_KEY environment variable
        if let Ok(api_key) = std::env::var("ALCHEMY_API_KEY") {
            tracing::info!("Using ALCHEMY_API_KEY environment variable for RPC URLs");

            for (network_name, network_config) in &mut self.networks {
                // Replace Alchemy demo URLs with actual API key
                if network_config.rpc_url.contains("alchemy.com/v2/demo") {
                    network_config.rpc_url = network_config
                        .rpc_url
                        .replace("/demo", &format!("/{}", api_key));
                    tracing::debug!("Updated {} RPC URL with API key", network_name);
                } else if network_config.rpc_url.contains("YOUR_API_KEY_HERE") {
                    network_config.rpc_url = network_config
                        .rpc_url
                        .replace("YOUR_API_KEY_HERE", &api_key);
                    tracing::debug!("Updated {} RPC URL with API key", network_name);
                }
            }
        } else {
            // Warn if using demo endpoints
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

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-bind").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# contract-bind configuration file
# Networks, write permissions, log subscriptions and known contracts

# Default network to use when none is specified
default_network = "ethereum"

# Network configurations
[networks.ethereum]
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.ethereum.gas]
default_gas_limit = 100000
max_gas_price = 50_000_000_000  # 50 Gwei
priority_fee = 2_000_000_000    # 2 Gwei

[networks.sepolia]
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.sepolia.gas]
default_gas_limit = 100000
max_gas_price = 20_000_000_000  # 20 Gwei
priority_fee = 1_000_000_000    # 1 Gwei

[networks.polygon]
rpc_url = "https://polygon-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 137
explorer_url = "https://polygonscan.com"

[networks.polygon.gas]
default_gas_limit = 100000
max_gas_price = 500_000_000_000  # 500 Gwei
priority_fee = 30_000_000_000    # 30 Gwei

[networks.arbitrum]
rpc_url = "https://arb-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 42161
explorer_url = "https://arbiscan.io"

[networks.arbitrum.gas]
default_gas_limit = 100000
max_gas_price = 5_000_000_000   # 5 Gwei
priority_fee = 100_000_000      # 0.1 Gwei

# Security settings
[security]
allow_write_operations = false
require_confirmation = true
# max_transaction_value = "1000000000000000000"  # 1 ETH in wei

# Live log subscriptions poll the node with eth_getFilterChanges
[subscription]
poll_interval_ms = 4000
buffer = 256

# Known contracts, usable by name on the command line
# [contracts.pool]
# artifact = "./out/RewardPool.json"
# address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
# network = "sepolia"

# Environment variables that can be used:
# ETHERSCAN_API_KEY - Your Etherscan API key for ABI resolution
# ALCHEMY_API_KEY - Your Alchemy API key (replace YOUR_API_KEY_HERE above)
# PRIVATE_KEY - Signing key for send and deploy
"#;
        sample_config.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.contracts.insert(
            "pool".to_string(),
            ContractEntry {
                artifact: PathBuf::from("out/RewardPool.json"),
                address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string()),
                network: Some("sepolia".to_string()),
            },
        );
        config.save_to_file(&path).await.unwrap();

        let loaded = Config::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.default_network, "ethereum");
        assert_eq!(loaded.networks.len(), config.networks.len());
        assert_eq!(loaded.subscription.poll_interval_ms, 4000);
        assert_eq!(loaded.contract("pool").unwrap(), &config.contracts["pool"]);
    }

    #[test]
    fn test_sample_parses() {
        let config: Config = toml::from_str(&Config::generate_sample()).unwrap();
        assert!(config.networks.contains_key("sepolia"));
        assert!(!config.security.allow_write_operations);
        assert!(config.contracts.is_empty());
    }

    #[test]
    fn test_optional_sections_default() {
        let config: Config = toml::from_str(
            r#"
default_network = "local"

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[networks.local.gas]
default_gas_limit = 3000000

[security]
allow_write_operations = true
require_confirmation = false
"#,
        )
        .unwrap();

        assert_eq!(config.subscription.buffer, 256);
        assert!(config.networks["local"].explorer_url.is_none());
        assert!(config.contract("pool").is_err());
    }

    #[test]
    fn test_rpc_override() {
        let mut config = Config::default();
        config.override_rpc_url("sepolia", "http://127.0.0.1:8545").unwrap();
        assert_eq!(config.networks["sepolia"].rpc_url, "http://127.0.0.1:8545");
        assert!(config.override_rpc_url("nowhere", "http://x").is_err());
    }
}
