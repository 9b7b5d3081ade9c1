use alloy::json_abi::JsonAbi;
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use super::interface::Interface;

/// Compiler output for one contract: its ABI and, when known, its bytecode
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub abi: JsonAbi,
    /// Creation code (`Bin`), hex
    pub bytecode: Option<String>,
    /// Runtime code (`BinRuntime`), hex
    pub deployed_bytecode: Option<String>,
}

impl Artifact {
    pub fn from_abi(abi: JsonAbi) -> Self {
        Self {
            abi,
            bytecode: None,
            deployed_bytecode: None,
        }
    }

    /// Parse either a bare ABI array or a compiler artifact object.
    ///
    /// Objects may carry `bytecode` or `bin`, and `deployedBytecode` or
    /// `binRuntime`, each as a hex string or as `{"object": "0x..."}`.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| anyhow!("Failed to parse artifact JSON: {}", e))?;

        match value {
            Value::Array(_) => {
                let abi: JsonAbi = serde_json::from_value(value)
                    .map_err(|e| anyhow!("Failed to parse ABI JSON: {}", e))?;
                Ok(Self::from_abi(abi))
            }
            Value::Object(mut object) => {
                let abi = object
                    .remove("abi")
                    .ok_or_else(|| anyhow!("Artifact has no 'abi' field"))?;
                let abi: JsonAbi = match abi {
                    // some toolchains store the ABI as an embedded JSON string
                    Value::String(s) => serde_json::from_str(&s),
                    other => serde_json::from_value(other),
                }
                .map_err(|e| anyhow!("Failed to parse ABI JSON: {}", e))?;

                Ok(Self {
                    abi,
                    bytecode: code_field(&object, &["bytecode", "bin"]),
                    deployed_bytecode: code_field(&object, &["deployedBytecode", "binRuntime"]),
                })
            }
            other => Err(anyhow!(
                "Artifact must be an ABI array or an object, got {}",
                match other {
                    Value::Null => "null",
                    Value::Bool(_) => "a boolean",
                    Value::Number(_) => "a number",
                    _ => "a string",
                }
            )),
        }
    }

    pub async fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read artifact {:?}: {}", path, e))?;
        Self::from_json_str(&content).map_err(|e| anyhow!("{:?}: {}", path, e))
    }

    pub fn interface(&self) -> Result<Interface> {
        Interface::new(self.abi.clone()).map_err(|e| anyhow!("{}", e))
    }

    pub fn bin(&self) -> Option<&str> {
        self.bytecode.as_deref()
    }

    pub fn bin_runtime(&self) -> Option<&str> {
        self.deployed_bytecode.as_deref()
    }
}

fn code_field(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let code = match object.get(*key)? {
            Value::String(s) => s.clone(),
            Value::Object(inner) => inner.get("object")?.as_str()?.to_string(),
            _ => return None,
        };
        let trimmed = code.trim_start_matches("0x");
        (!trimmed.is_empty()).then_some(code)
    })
}

/// Where artifacts come from when they are not loaded by hand
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    pub etherscan_api_key: Option<String>,
    pub cache_dir: PathBuf,
}

impl Default for ArtifactSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("contract-bind")
            .join("abi-cache");

        Self {
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY").ok(),
            cache_dir,
        }
    }
}

/// Resolves artifacts by contract address, caching in memory and on disk
#[derive(Debug)]
pub struct ArtifactResolver {
    client: Client,
    config: ArtifactSource,
    memory_cache: HashMap<String, Artifact>,
}

impl ArtifactResolver {
    pub fn new(config: ArtifactSource) -> Self {
        Self {
            client: Client::new(),
            config,
            memory_cache: HashMap::new(),
        }
    }

    fn cache_key(address: &str, network: Option<&str>) -> String {
        format!("{}_{}", network.unwrap_or("mainnet"), address.to_lowercase())
    }

    fn cache_path(&self, cache_key: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{}.json", cache_key))
    }

    /// Memory cache, then disk cache, then the block explorer
    pub async fn get_artifact(&mut self, address: &str, network: Option<&str>) -> Result<Artifact> {
        let cache_key = Self::cache_key(address, network);

        if let Some(artifact) = self.memory_cache.get(&cache_key) {
            debug!("Artifact cache hit for {}", address);
            return Ok(artifact.clone());
        }

        if let Ok(artifact) = self.load_cached(&cache_key).await {
            debug!("Artifact disk cache hit for {}", address);
            self.memory_cache.insert(cache_key, artifact.clone());
            return Ok(artifact);
        }

        info!("Fetching ABI from explorer for {}", address);
        let abi = self.fetch_from_explorer(&address.to_lowercase(), network).await?;
        let artifact = Artifact::from_abi(abi);

        if let Err(e) = self.store_cached(&cache_key, &artifact).await {
            warn!("Failed to cache ABI for {}: {}", address, e);
        }

        self.memory_cache.insert(cache_key, artifact.clone());
        Ok(artifact)
    }

    async fn fetch_from_explorer(&self, address: &str, network: Option<&str>) -> Result<JsonAbi> {
        let base_url = match network.unwrap_or("mainnet") {
            "mainnet" | "ethereum" => "https://api.etherscan.io",
            "sepolia" => "https://api-sepolia.etherscan.io",
            "polygon" => "https://api.polygonscan.com",
            "arbitrum" => "https://api.arbiscan.io",
            "optimism" => "https://api-optimistic.etherscan.io",
            other => return Err(anyhow!("Unsupported network for explorer lookup: {}", other)),
        };

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

        if response["status"] != "1" {
            let message = response["result"]
                .as_str()
                .or_else(|| response["message"].as_str())
                .unwrap_or("Unknown error");
            return Err(anyhow!("Explorer API error: {}", message));
        }

        let abi_str = response["result"]
            .as_str()
            .ok_or_else(|| anyhow!("No ABI found in response"))?;

        serde_json::from_str(abi_str).map_err(|e| anyhow!("Failed to parse ABI JSON: {}", e))
    }

    async fn load_cached(&self, cache_key: &str) -> Result<Artifact> {
        let cache_path = self.cache_path(cache_key);
        if !cache_path.exists() {
            return Err(anyhow!("Cache file does not exist"));
        }
        Artifact::load_file(&cache_path).await
    }

    async fn store_cached(&self, cache_key: &str, artifact: &Artifact) -> Result<()> {
        if !self.config.cache_dir.exists() {
            fs::create_dir_all(&self.config.cache_dir)
                .await
                .map_err(|e| anyhow!("Failed to create cache directory: {}", e))?;
        }

        let mut object = serde_json::Map::new();
        object.insert(
            "abi".to_string(),
            serde_json::to_value(&artifact.abi).map_err(|e| anyhow!("Failed to serialize ABI: {}", e))?,
        );
        if let Some(bin) = &artifact.bytecode {
            object.insert("bytecode".to_string(), Value::String(bin.clone()));
        }
        if let Some(bin_runtime) = &artifact.deployed_bytecode {
            object.insert("deployedBytecode".to_string(), Value::String(bin_runtime.clone()));
        }

        let cache_path = self.cache_path(cache_key);
        let content = serde_json::to_string_pretty(&Value::Object(object))
            .map_err(|e| anyhow!("Failed to serialize artifact: {}", e))?;
        fs::write(&cache_path, content)
            .await
            .map_err(|e| anyhow!("Failed to write cache file: {}", e))?;

        debug!("Cached artifact to {:?}", cache_path);
        Ok(())
    }

    /// Register an artifact for a contract the explorer cannot serve
    pub fn add_manual(&mut self, address: &str, network: Option<&str>, artifact: Artifact) {
        self.memory_cache.insert(Self::cache_key(address, network), artifact);
        info!("Added manual artifact for {}", address);
    }

    /// Whether an artifact is available without fetching
    pub fn has_artifact(&self, address: &str, network: Option<&str>) -> bool {
        let cache_key = Self::cache_key(address, network);
        self.memory_cache.contains_key(&cache_key) || self.cache_path(&cache_key).exists()
    }

    pub async fn clear_cache(&mut self) -> Result<()> {
        self.memory_cache.clear();

        if self.config.cache_dir.exists() {
            fs::remove_dir_all(&self.config.cache_dir)
                .await
                .map_err(|e| anyhow!("Failed to clear cache directory: {}", e))?;
        }

        info!("Cleared artifact cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::interface::fixtures::REWARD_POOL_ABI;
    use tempfile::tempdir;

    fn resolver_in(dir: &Path) -> ArtifactResolver {
        ArtifactResolver::new(ArtifactSource {
            etherscan_api_key: None,
            cache_dir: dir.to_path_buf(),
        })
    }

    #[test]
    fn test_bare_abi_array() {
        let artifact = Artifact::from_json_str(REWARD_POOL_ABI).unwrap();
        assert_eq!(artifact.abi.functions().count(), 6);
        assert!(artifact.bin().is_none());
        assert!(artifact.interface().is_ok());
    }

    #[test]
    fn test_compiler_artifact_shapes() {
        let foundry = format!(
            r#"{{"abi": {}, "bytecode": {{"object": "0x6080"}}, "deployedBytecode": {{"object": "0x6001"}}}}"#,
            REWARD_POOL_ABI
        );
        let artifact = Artifact::from_json_str(&foundry).unwrap();
        assert_eq!(artifact.bin(), Some("0x6080"));
        assert_eq!(artifact.bin_runtime(), Some("0x6001"));

        let solc = format!(r#"{{"abi": {}, "bin": "6080", "binRuntime": ""}}"#, REWARD_POOL_ABI);
        let artifact = Artifact::from_json_str(&solc).unwrap();
        assert_eq!(artifact.bin(), Some("6080"));
        assert!(artifact.bin_runtime().is_none());
    }

    #[test]
    fn test_artifact_without_abi_rejected() {
        assert!(Artifact::from_json_str(r#"{"bytecode": "0x6080"}"#).is_err());
        assert!(Artifact::from_json_str("42").is_err());
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("RewardPool.json");
        std::fs::write(&path, REWARD_POOL_ABI).unwrap();

        let artifact = Artifact::load_file(&path).await.unwrap();
        assert_eq!(artifact.abi.events().count(), 2);
        assert!(Artifact::load_file(dir.path().join("missing.json")).await.is_err());
    }

    #[tokio::test]
    async fn test_manual_artifact_is_cached() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_in(dir.path());
        let artifact = Artifact::from_json_str(REWARD_POOL_ABI).unwrap();

        resolver.add_manual("0xABC", Some("sepolia"), artifact.clone());

        assert!(resolver.has_artifact("0xabc", Some("sepolia")));
        assert!(!resolver.has_artifact("0xabc", Some("polygon")));
        let resolved = resolver.get_artifact("0xAbC", Some("sepolia")).await.unwrap();
        assert_eq!(resolved, artifact);
    }

    #[tokio::test]
    async fn test_disk_cache_round_trip() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_in(dir.path());
        let mut artifact = Artifact::from_json_str(REWARD_POOL_ABI).unwrap();
        artifact.bytecode = Some("0x6080".to_string());

        let key = ArtifactResolver::cache_key("0xabc", None);
        resolver.store_cached(&key, &artifact).await.unwrap();

        assert!(resolver.has_artifact("0xabc", None));
        let loaded = resolver.get_artifact("0xabc", None).await.unwrap();
        assert_eq!(loaded.bin(), Some("0x6080"));
        assert_eq!(loaded.abi.functions().count(), 6);

        resolver.clear_cache().await.unwrap();
        assert!(!resolver.has_artifact("0xabc", None));
    }
}
