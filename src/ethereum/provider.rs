use crate::config::{Config, GasConfig, NetworkConfig};
use crate::error::{BindingError, Result as BindingResult};
use alloy::{
    eips::BlockId,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Log, TransactionRequest},
    transports::http::{reqwest::Url, Client, Http},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{LogFilter, LogSubscription, Transport};
use super::{utils, CallOptions, LogRecord, PendingTransaction, TransactOptions};

/// JSON-RPC transport over HTTP
#[derive(Debug, Clone)]
pub struct RpcTransport {
    provider: RootProvider<Http<Client>>,
    url: Url,
    gas: GasConfig,
    poll_interval: Duration,
    buffer: usize,
}

impl RpcTransport {
    pub fn new(network_config: &NetworkConfig, poll_interval: Duration, buffer: usize) -> Result<Self> {
        let url: Url = network_config
            .rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", network_config.rpc_url, e))?;
        let provider = ProviderBuilder::new().on_http(url.clone());

        Ok(Self {
            provider,
            url,
            gas: network_config.gas.clone(),
            poll_interval,
            buffer: buffer.max(1),
        })
    }

    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.provider
    }

    async fn resolve_nonce(&self, from: Address, options: &TransactOptions) -> BindingResult<u64> {
        if let Some(nonce) = options.nonce {
            return Ok(nonce);
        }
        self.provider
            .get_transaction_count(from)
            .block_id(BlockId::pending())
            .await
            .map_err(|e| utils::classify_rpc_error(&e))
    }

    async fn resolve_gas_limit(&self, request: &TransactionRequest, options: &TransactOptions) -> u64 {
        if let Some(gas) = options.gas_limit {
            return gas;
        }
        match self.provider.estimate_gas(request).await {
            Ok(estimated) => estimated,
            Err(e) => {
                warn!("Gas estimation failed, using default: {}", e);
                self.gas.default_gas_limit
            }
        }
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn call(&self, to: Address, data: Bytes, options: &CallOptions) -> BindingResult<Bytes> {
        let mut request = TransactionRequest::default().with_to(to).with_input(data);
        if let Some(from) = options.from {
            request = request.with_from(from);
        }

        debug!("eth_call to {:?} at {:?}", to, options.block);
        self.provider
            .call(&request)
            .block(options.block)
            .await
            .map_err(|e| utils::classify_rpc_error(&e))
    }

    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: Bytes,
        options: &TransactOptions,
    ) -> BindingResult<PendingTransaction> {
        let signer = options.require_signer()?.clone();
        let from = signer.address();

        let mut request = TransactionRequest::default()
            .with_from(from)
            .with_value(options.value);
        request = match to {
            Some(to) => request.with_to(to).with_input(data),
            None => request.with_deploy_code(data),
        };

        let nonce = self.resolve_nonce(from, options).await?;
        request = request.with_nonce(nonce);

        let gas_limit = self.resolve_gas_limit(&request, options).await;
        request = request.with_gas_limit(gas_limit);

        request = match fee_plan(&self.gas, options.gas_price) {
            FeePlan::Legacy(gas_price) => request.with_gas_price(gas_price),
            FeePlan::Eip1559 { max_fee, priority_fee } => {
                let max_fee = match max_fee {
                    Some(max_fee) => max_fee,
                    None => self
                        .provider
                        .estimate_eip1559_fees(None)
                        .await
                        .map_err(|e| utils::classify_rpc_error(&e))?
                        .max_fee_per_gas
                        .max(priority_fee),
                };
                request
                    .with_max_fee_per_gas(max_fee)
                    .with_max_priority_fee_per_gas(priority_fee.min(max_fee))
            }
            FeePlan::Node => request,
        };

        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.url.clone());

        let pending = provider
            .send_transaction(request)
            .await
            .map_err(|e| utils::classify_rpc_error(&e))?;
        let hash = *pending.tx_hash();

        info!("Transaction sent from {:?} with hash {:?} (nonce {})", from, hash, nonce);
        Ok(PendingTransaction { hash, from, nonce })
    }

    async fn query_logs(&self, filter: &LogFilter) -> BindingResult<Vec<LogRecord>> {
        let logs = self
            .provider
            .get_logs(&filter.to_rpc())
            .await
            .map_err(|e| BindingError::Transport(utils::interpret_rpc_error(&e.to_string())))?;

        debug!("eth_getLogs returned {} logs", logs.len());
        Ok(logs.into_iter().map(LogRecord::from).collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> BindingResult<LogSubscription> {
        let rpc_filter = filter.to_rpc();
        let id = self
            .provider
            .new_filter(&rpc_filter)
            .await
            .map_err(|e| BindingError::Transport(utils::interpret_rpc_error(&e.to_string())))?;
        debug!("Installed log filter {}", id);

        let (sender, receiver) = mpsc::channel(self.buffer);
        let token = CancellationToken::new();
        tokio::spawn(poll_filter(
            self.provider.clone(),
            id,
            sender,
            token.clone(),
            self.poll_interval,
        ));

        Ok(LogSubscription::new(receiver, move || token.cancel()))
    }
}

/// How a transaction's fees are set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeePlan {
    /// Fixed legacy gas price
    Legacy(u128),
    /// EIP-1559 tip from configuration; the fee cap is estimated when unset
    Eip1559 { max_fee: Option<u128>, priority_fee: u128 },
    /// Left to the node's estimate
    Node,
}

/// An explicit gas price wins, then a configured priority fee (capped by
/// `max_gas_price`), then `max_gas_price` as a legacy price.
fn fee_plan(gas: &GasConfig, gas_price: Option<u128>) -> FeePlan {
    match (gas_price, gas.priority_fee, gas.max_gas_price) {
        (Some(gas_price), _, _) => FeePlan::Legacy(gas_price),
        (None, Some(priority_fee), max_fee) => FeePlan::Eip1559 {
            max_fee: max_fee.map(u128::from),
            priority_fee: u128::from(priority_fee),
        },
        (None, None, Some(max_fee)) => FeePlan::Legacy(u128::from(max_fee)),
        (None, None, None) => FeePlan::Node,
    }
}

/// Forward filter changes until cancelled, the consumer leaves, or the node
/// errors; the filter is uninstalled on every exit.
async fn poll_filter(
    provider: RootProvider<Http<Client>>,
    id: U256,
    sender: mpsc::Sender<BindingResult<LogRecord>>,
    token: CancellationToken,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let changes: std::result::Result<Vec<Log>, _> = provider.get_filter_changes(id).await;
                match changes {
                    Ok(logs) => {
                        if !forward(&sender, logs).await {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = sender
                            .send(Err(BindingError::Subscription(utils::interpret_rpc_error(&e.to_string()))))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    match provider.uninstall_filter(id).await {
        Ok(_) => debug!("Uninstalled log filter {}", id),
        Err(e) => debug!("Failed to uninstall log filter {}: {}", id, e),
    }
}

async fn forward(sender: &mpsc::Sender<BindingResult<LogRecord>>, logs: Vec<Log>) -> bool {
    for log in logs {
        if sender.send(Ok(LogRecord::from(log))).await.is_err() {
            return false;
        }
    }
    true
}

/// Named networks from configuration, each with its own transport
#[derive(Debug)]
pub struct ProviderManager {
    transports: HashMap<String, Arc<RpcTransport>>,
    config: Config,
}

impl ProviderManager {
    pub fn new(config: Config) -> Result<Self> {
        let mut transports = HashMap::new();
        let poll_interval = Duration::from_millis(config.subscription.poll_interval_ms);

        for (network_name, network_config) in &config.networks {
            let transport =
                RpcTransport::new(network_config, poll_interval, config.subscription.buffer)?;
            transports.insert(network_name.clone(), Arc::new(transport));
        }

        Ok(Self { transports, config })
    }

    pub fn get_transport(&self, network: Option<&str>) -> Result<Arc<RpcTransport>> {
        let network_name = network.unwrap_or(&self.config.default_network);
        self.transports
            .get(network_name)
            .cloned()
            .ok_or_else(|| anyhow!("Network '{}' not found", network_name))
    }

    pub fn get_network_config(&self, network: Option<&str>) -> Result<&NetworkConfig> {
        let network_name = network.unwrap_or(&self.config.default_network);
        self.config
            .networks
            .get(network_name)
            .ok_or_else(|| anyhow!("Network '{}' not configured", network_name))
    }

    /// Point one network at a different endpoint, rebuilding its transport
    pub fn override_endpoint(&mut self, network: &str, rpc_url: &str) -> Result<()> {
        self.config.override_rpc_url(network, rpc_url)?;
        let poll_interval = Duration::from_millis(self.config.subscription.poll_interval_ms);
        let transport = RpcTransport::new(
            self.get_network_config(Some(network))?,
            poll_interval,
            self.config.subscription.buffer,
        )?;
        self.transports.insert(network.to_string(), Arc::new(transport));
        Ok(())
    }

    pub fn get_available_networks(&self) -> Vec<String> {
        self.config.networks.keys().cloned().collect()
    }

    /// Validates network connectivity with detailed error information
    pub async fn validate_network_connection(&self, network: Option<&str>) -> Result<()> {
        let network_name = network.unwrap_or(&self.config.default_network);
        let transport = self
            .get_transport(network)
            .map_err(|e| anyhow!("Network '{}' is not configured: {}", network_name, e))?;

        let chain_id = transport.provider().get_chain_id().await.map_err(|e| {
            anyhow!(
                "Cannot connect to network '{}': {}. Please check your RPC endpoint configuration and network connectivity.",
                network_name,
                utils::interpret_rpc_error(&e.to_string())
            )
        })?;

        let expected = self.get_network_config(network)?.chain_id;
        if chain_id != expected {
            warn!(
                "Network '{}' reports chain id {} but is configured as {}",
                network_name, chain_id, expected
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_builds_a_transport_per_network() {
        let config = Config::default();
        let manager = ProviderManager::new(config.clone()).unwrap();

        let mut networks = manager.get_available_networks();
        networks.sort();
        let mut expected: Vec<String> = config.networks.keys().cloned().collect();
        expected.sort();
        assert_eq!(networks, expected);

        assert!(manager.get_transport(None).is_ok());
        assert!(manager.get_transport(Some("sepolia")).is_ok());
        assert!(manager.get_transport(Some("nowhere")).is_err());
    }

    #[test]
    fn test_invalid_rpc_url_rejected() {
        let mut network = Config::default().networks["ethereum"].clone();
        network.rpc_url = "not a url".to_string();
        assert!(RpcTransport::new(&network, Duration::from_secs(1), 16).is_err());
    }

    #[test]
    fn test_fee_plan() {
        let gas = |max_gas_price: Option<u64>, priority_fee: Option<u64>| GasConfig {
            default_gas_limit: 100_000,
            max_gas_price,
            priority_fee,
        };

        assert_eq!(
            fee_plan(&gas(Some(50), Some(2)), Some(7)),
            FeePlan::Legacy(7)
        );
        assert_eq!(
            fee_plan(&gas(Some(50), Some(2)), None),
            FeePlan::Eip1559 { max_fee: Some(50), priority_fee: 2 }
        );
        assert_eq!(
            fee_plan(&gas(None, Some(2)), None),
            FeePlan::Eip1559 { max_fee: None, priority_fee: 2 }
        );
        assert_eq!(fee_plan(&gas(Some(50), None), None), FeePlan::Legacy(50));
        assert_eq!(fee_plan(&gas(None, None), None), FeePlan::Node);
    }

    #[test]
    fn test_endpoint_override_targets_one_network() {
        let mut manager = ProviderManager::new(Config::default()).unwrap();
        let before = manager.get_network_config(Some("ethereum")).unwrap().rpc_url.clone();

        manager.override_endpoint("sepolia", "http://127.0.0.1:8545").unwrap();

        assert_eq!(
            manager.get_network_config(Some("sepolia")).unwrap().rpc_url,
            "http://127.0.0.1:8545"
        );
        assert_eq!(manager.get_network_config(Some("ethereum")).unwrap().rpc_url, before);
        assert!(manager.override_endpoint("nowhere", "http://127.0.0.1:8545").is_err());
        assert!(manager.override_endpoint("sepolia", "not a url").is_err());
    }

    #[tokio::test]
    async fn test_send_without_signer_fails_locally() {
        let network = Config::default().networks["ethereum"].clone();
        let transport = RpcTransport::new(&network, Duration::from_secs(1), 16).unwrap();

        let err = transport
            .send_transaction(Some(Address::ZERO), Bytes::new(), &TransactOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, BindingError::AuthRequired);
    }
}
